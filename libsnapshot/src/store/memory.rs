//! In-process store implementation.
//!
//! [`MemoryStore`] keeps all objects in concurrent maps. It backs the crate's
//! tests and is useful for embedders that drive the engine without an
//! external control plane. The `installed` switch models a control plane
//! whose snapshot resource has not been registered yet, which is what the
//! bootstrap helpers poll for.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::api::{
    PERSISTENT_VOLUME_CLAIM_RESOURCE, PERSISTENT_VOLUME_RESOURCE, PersistentVolume,
    PersistentVolumeClaim, VOLUME_SNAPSHOT_DATA_RESOURCE, VOLUME_SNAPSHOT_RESOURCE,
    VolumeSnapshot, VolumeSnapshotData,
};
use crate::cache::join_snapshot_name;
use crate::store::{CoreClient, SnapshotStore, StoreError};

/// DashMap-backed store for tests and in-process embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: DashMap<String, VolumeSnapshot>,
    snapshot_data: DashMap<String, VolumeSnapshotData>,
    claims: DashMap<String, PersistentVolumeClaim>,
    volumes: DashMap<String, PersistentVolume>,
    installed: AtomicBool,
}

impl MemoryStore {
    /// An empty store whose snapshot resource is already served.
    pub fn new() -> Self {
        let store = Self::default();
        store.installed.store(true, Ordering::SeqCst);
        store
    }

    /// An empty store whose snapshot resource is not served yet; list and get
    /// calls fail with not-found until [`Self::set_installed`] flips it.
    pub fn not_installed() -> Self {
        Self::default()
    }

    /// Toggle whether the snapshot resource is served.
    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }

    fn check_installed(&self) -> Result<(), StoreError> {
        if self.installed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::not_found(VOLUME_SNAPSHOT_RESOURCE, "*"))
        }
    }

    /// Seed or replace a snapshot object.
    pub fn put_snapshot(&self, snapshot: VolumeSnapshot) {
        self.snapshots
            .insert(snapshot.metadata.qualified_name(), snapshot);
    }

    /// Remove a snapshot object by identity. No-op if absent.
    pub fn remove_snapshot(&self, namespace: &str, name: &str) {
        self.snapshots.remove(&join_snapshot_name(namespace, name));
    }

    /// Seed or replace a snapshot-data object.
    pub fn put_snapshot_data(&self, data: VolumeSnapshotData) {
        self.snapshot_data.insert(data.metadata.name.clone(), data);
    }

    /// Seed or replace a claim.
    pub fn put_claim(&self, claim: PersistentVolumeClaim) {
        self.claims.insert(claim.metadata.qualified_name(), claim);
    }

    /// Seed or replace a volume.
    pub fn put_volume(&self, volume: PersistentVolume) {
        self.volumes.insert(volume.metadata.name.clone(), volume);
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VolumeSnapshot, StoreError> {
        self.check_installed()?;
        let key = join_snapshot_name(namespace, name);
        self.snapshots
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::not_found(VOLUME_SNAPSHOT_RESOURCE, key))
    }

    async fn list_snapshots(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<VolumeSnapshot>, StoreError> {
        self.check_installed()?;
        Ok(self
            .snapshots
            .iter()
            .filter(|e| match namespace {
                Some(namespace) => e.value().metadata.namespace.as_deref() == Some(namespace),
                None => true,
            })
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), StoreError> {
        self.check_installed()?;
        let key = snapshot.metadata.qualified_name();
        if !self.snapshots.contains_key(&key) {
            return Err(StoreError::not_found(VOLUME_SNAPSHOT_RESOURCE, key));
        }
        self.snapshots.insert(key, snapshot.clone());
        Ok(())
    }

    async fn create_snapshot_data(&self, data: &VolumeSnapshotData) -> Result<(), StoreError> {
        self.check_installed()?;
        let name = data.metadata.name.clone();
        if self.snapshot_data.contains_key(&name) {
            return Err(StoreError::already_exists(
                VOLUME_SNAPSHOT_DATA_RESOURCE,
                name,
            ));
        }
        self.snapshot_data.insert(name, data.clone());
        Ok(())
    }

    async fn list_snapshot_data(&self) -> Result<Vec<VolumeSnapshotData>, StoreError> {
        self.check_installed()?;
        Ok(self
            .snapshot_data
            .iter()
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete_snapshot_data(&self, name: &str) -> Result<(), StoreError> {
        self.check_installed()?;
        self.snapshot_data
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(VOLUME_SNAPSHOT_DATA_RESOURCE, name))
    }
}

#[async_trait]
impl CoreClient for MemoryStore {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let key = join_snapshot_name(namespace, name);
        self.claims
            .get(&key)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::not_found(PERSISTENT_VOLUME_CLAIM_RESOURCE, key))
    }

    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        self.volumes
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::not_found(PERSISTENT_VOLUME_RESOURCE, name))
    }
}
