//! File-backed control-plane store.
//!
//! [`FileStore`] keeps every object as a pretty-printed JSON file so the
//! daemon can run without an external API server. Users declare snapshots by
//! dropping `VolumeSnapshot` files under the store root; the controller loop
//! picks them up on its next sync.
//!
//! # On-disk layout
//!
//! ```text
//! <root>/
//!   snapshots/<namespace>/<name>.json
//!   snapshotdata/<name>.json
//!   claims/<namespace>/<name>.json
//!   volumes/<name>.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use libsnapshot::api::{
    PERSISTENT_VOLUME_CLAIM_RESOURCE, PERSISTENT_VOLUME_RESOURCE, PersistentVolume,
    PersistentVolumeClaim, VOLUME_SNAPSHOT_DATA_RESOURCE, VOLUME_SNAPSHOT_RESOURCE,
    VolumeSnapshot, VolumeSnapshotData,
};
use libsnapshot::cache::join_snapshot_name;
use libsnapshot::store::{CoreClient, SnapshotStore, StoreError};

const SNAPSHOTS_DIR: &str = "snapshots";
const SNAPSHOT_DATA_DIR: &str = "snapshotdata";
const CLAIMS_DIR: &str = "claims";
const VOLUMES_DIR: &str = "volumes";

/// JSON-files-on-disk implementation of the store traits.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the directory skeleton.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [SNAPSHOTS_DIR, SNAPSHOT_DATA_DIR, CLAIMS_DIR, VOLUMES_DIR] {
            tokio::fs::create_dir_all(root.join(dir))
                .await
                .map_err(StoreError::transport)?;
        }
        info!(root = %root.display(), "file store opened");
        Ok(Self { root })
    }

    fn snapshot_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(SNAPSHOTS_DIR)
            .join(namespace)
            .join(format!("{name}.json"))
    }

    fn snapshot_data_path(&self, name: &str) -> PathBuf {
        self.root.join(SNAPSHOT_DATA_DIR).join(format!("{name}.json"))
    }

    fn claim_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(CLAIMS_DIR)
            .join(namespace)
            .join(format!("{name}.json"))
    }

    fn volume_path(&self, name: &str) -> PathBuf {
        self.root.join(VOLUMES_DIR).join(format!("{name}.json"))
    }

    async fn read_json<T: DeserializeOwned>(
        path: &Path,
        kind: &'static str,
        name: &str,
    ) -> Result<T, StoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::not_found(kind, name));
            }
            Err(e) => return Err(StoreError::transport(e)),
        };
        serde_json::from_slice(&bytes).map_err(StoreError::transport)
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(StoreError::transport)?;
        }
        let json = serde_json::to_string_pretty(value).map_err(StoreError::transport)?;
        tokio::fs::write(path, json)
            .await
            .map_err(StoreError::transport)
    }

    /// Read every `.json` object file directly under `dir`.
    async fn read_dir_objects<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(StoreError::transport(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::transport)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(StoreError::transport)?;
            let value = serde_json::from_slice(&bytes).map_err(StoreError::transport)?;
            out.push(value);
        }
        Ok(out)
    }

    /// Seed a claim object. Used by setup tooling and tests.
    pub async fn put_claim(&self, claim: &PersistentVolumeClaim) -> Result<(), StoreError> {
        let namespace = claim.metadata.namespace.as_deref().unwrap_or_default();
        Self::write_json(&self.claim_path(namespace, &claim.metadata.name), claim).await
    }

    /// Seed a volume object. Used by setup tooling and tests.
    pub async fn put_volume(&self, volume: &PersistentVolume) -> Result<(), StoreError> {
        Self::write_json(&self.volume_path(&volume.metadata.name), volume).await
    }

    /// Seed a snapshot object. Used by setup tooling and tests.
    pub async fn put_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), StoreError> {
        let namespace = snapshot.metadata.namespace.as_deref().unwrap_or_default();
        Self::write_json(
            &self.snapshot_path(namespace, &snapshot.metadata.name),
            snapshot,
        )
        .await
    }

    /// Remove a snapshot object, marking it undesired. No-op if absent.
    pub async fn remove_snapshot(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.snapshot_path(namespace, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::transport(e)),
        }
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn get_snapshot(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VolumeSnapshot, StoreError> {
        Self::read_json(
            &self.snapshot_path(namespace, name),
            VOLUME_SNAPSHOT_RESOURCE,
            &join_snapshot_name(namespace, name),
        )
        .await
    }

    async fn list_snapshots(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<VolumeSnapshot>, StoreError> {
        let base = self.root.join(SNAPSHOTS_DIR);
        match namespace {
            Some(namespace) => Self::read_dir_objects(&base.join(namespace)).await,
            None => {
                let mut out = Vec::new();
                let mut namespaces = match tokio::fs::read_dir(&base).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
                    Err(e) => return Err(StoreError::transport(e)),
                };
                while let Some(entry) =
                    namespaces.next_entry().await.map_err(StoreError::transport)?
                {
                    if entry
                        .file_type()
                        .await
                        .map_err(StoreError::transport)?
                        .is_dir()
                    {
                        out.extend(Self::read_dir_objects(&entry.path()).await?);
                    }
                }
                Ok(out)
            }
        }
    }

    async fn update_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<(), StoreError> {
        let namespace = snapshot.metadata.namespace.as_deref().unwrap_or_default();
        let path = self.snapshot_path(namespace, &snapshot.metadata.name);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(StoreError::transport)?
        {
            return Err(StoreError::not_found(
                VOLUME_SNAPSHOT_RESOURCE,
                snapshot.metadata.qualified_name(),
            ));
        }
        debug!(snapshot = %snapshot.metadata.qualified_name(), "updating snapshot object");
        Self::write_json(&path, snapshot).await
    }

    async fn create_snapshot_data(&self, data: &VolumeSnapshotData) -> Result<(), StoreError> {
        let path = self.snapshot_data_path(&data.metadata.name);
        if tokio::fs::try_exists(&path)
            .await
            .map_err(StoreError::transport)?
        {
            return Err(StoreError::already_exists(
                VOLUME_SNAPSHOT_DATA_RESOURCE,
                data.metadata.name.clone(),
            ));
        }
        Self::write_json(&path, data).await
    }

    async fn list_snapshot_data(&self) -> Result<Vec<VolumeSnapshotData>, StoreError> {
        Self::read_dir_objects(&self.root.join(SNAPSHOT_DATA_DIR)).await
    }

    async fn delete_snapshot_data(&self, name: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.snapshot_data_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::not_found(VOLUME_SNAPSHOT_DATA_RESOURCE, name))
            }
            Err(e) => Err(StoreError::transport(e)),
        }
    }
}

#[async_trait]
impl CoreClient for FileStore {
    async fn get_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        Self::read_json(
            &self.claim_path(namespace, name),
            PERSISTENT_VOLUME_CLAIM_RESOURCE,
            &join_snapshot_name(namespace, name),
        )
        .await
    }

    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        Self::read_json(&self.volume_path(name), PERSISTENT_VOLUME_RESOURCE, name).await
    }
}
