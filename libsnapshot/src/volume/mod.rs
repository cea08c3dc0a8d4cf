//! Pluggable storage-backend contract.
//!
//! A [`VolumePlugin`] knows how to take and delete snapshots for one volume
//! type. The registry maps volume-type tags (from
//! [`PersistentVolumeSource::volume_type`]) to plugins; it is populated once
//! at startup and only read afterwards.

pub mod hostpath;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::{PersistentVolume, PersistentVolumeSpec, VolumeSnapshotDataSource};
use crate::error::SnapshotError;

pub use hostpath::{HOSTPATH_PLUGIN_NAME, HostPathPlugin};

/// Per-backend snapshot operations.
///
/// Implementations must be idempotent under retries: `snapshot_create` may be
/// called again after a partial failure, and `snapshot_delete` must succeed
/// (or no-op) when the backing artifact is already absent.
#[async_trait]
pub trait VolumePlugin: Send + Sync {
    /// Take a snapshot of the volume described by `volume` and return the
    /// backend-specific location of the result.
    async fn snapshot_create(
        &self,
        volume: &PersistentVolumeSpec,
    ) -> Result<VolumeSnapshotDataSource, SnapshotError>;

    /// Delete the snapshot identified by `source`. `volume` is provided when
    /// the engine still knows the source volume.
    async fn snapshot_delete(
        &self,
        source: &VolumeSnapshotDataSource,
        volume: Option<&PersistentVolume>,
    ) -> Result<(), SnapshotError>;
}

/// Mapping from volume-type tag to plugin, built by the bootstrap step.
pub type VolumePluginRegistry = HashMap<String, Arc<dyn VolumePlugin>>;

/// Resolve the plugin responsible for `spec`'s volume type.
///
/// There is no fallback: an unrecognized or unregistered type fails with
/// [`SnapshotError::UnsupportedVolumeType`].
pub fn plugin_for<'a>(
    registry: &'a VolumePluginRegistry,
    spec: &PersistentVolumeSpec,
) -> Result<&'a Arc<dyn VolumePlugin>, SnapshotError> {
    let volume_type = spec.source.volume_type();
    registry
        .get(volume_type)
        .ok_or_else(|| SnapshotError::UnsupportedVolumeType(volume_type.to_owned()))
}
