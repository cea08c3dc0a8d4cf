//! Control-plane store boundary.
//!
//! The engine never talks to a concrete API server; it is injected with
//! implementations of [`SnapshotStore`] (snapshot and snapshot-data objects)
//! and [`CoreClient`] (claim and volume lookups). Reads return owned clones,
//! so callers always mutate their own copy before writing back. Writes are
//! unversioned full replaces: concurrent writers can silently overwrite each
//! other, which is a documented limitation of this engine, not of the store.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::api::{
    PersistentVolume, PersistentVolumeClaim, VolumeSnapshot, VolumeSnapshotData,
};

pub use memory::MemoryStore;

/// Store access failure. The engine branches on not-found versus transport:
/// not-found is a retryable not-ready signal during bootstrap and a terminal
/// absent signal during steady-state lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The named object does not exist (or the resource is not served yet).
    #[error("{kind} {name} not found")]
    NotFound {
        /// Plural resource name, e.g. `"volumesnapshots"`.
        kind: &'static str,
        /// Object name or identity.
        name: String,
    },

    /// An object with this name already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        kind: &'static str,
        name: String,
    },

    /// The store itself could not be reached or misbehaved.
    #[error("store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    /// Create a [`StoreError::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a [`StoreError::AlreadyExists`].
    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    /// Create a [`StoreError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// `true` for the not-found variant.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Persistence operations for snapshot and snapshot-data objects.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch one snapshot by namespace and name.
    async fn get_snapshot(&self, namespace: &str, name: &str)
    -> Result<VolumeSnapshot, StoreError>;

    /// List snapshots, optionally scoped to one namespace.
    async fn list_snapshots(&self, namespace: Option<&str>)
    -> Result<Vec<VolumeSnapshot>, StoreError>;

    /// Replace an existing snapshot object wholesale.
    async fn update_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), StoreError>;

    /// Persist a new snapshot-data object.
    async fn create_snapshot_data(&self, data: &VolumeSnapshotData) -> Result<(), StoreError>;

    /// List all snapshot-data objects.
    async fn list_snapshot_data(&self) -> Result<Vec<VolumeSnapshotData>, StoreError>;

    /// Delete a snapshot-data object by name.
    async fn delete_snapshot_data(&self, name: &str) -> Result<(), StoreError>;
}

/// Read-only lookups of claims and volumes.
#[async_trait]
pub trait CoreClient: Send + Sync {
    /// Fetch one claim by namespace and name.
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError>;

    /// Fetch one volume by name (volumes are cluster-scoped).
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError>;
}
