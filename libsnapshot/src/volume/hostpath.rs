//! Hostpath volume plugin.
//!
//! Snapshots a hostpath volume by archiving its directory with `tar` into a
//! configurable snapshot directory. Useful for single-node setups and tests;
//! cloud-backed plugins implement the same trait against their provider APIs.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::api::{
    PersistentVolume, PersistentVolumeSource, PersistentVolumeSpec, VolumeSnapshotDataSource,
};
use crate::error::SnapshotError;
use crate::volume::VolumePlugin;

/// Registry tag served by this plugin.
pub const HOSTPATH_PLUGIN_NAME: &str = "hostPath";

/// Plugin that snapshots hostpath volumes into tar archives.
pub struct HostPathPlugin {
    /// Directory that receives the snapshot archives.
    snapshot_dir: PathBuf,
}

impl HostPathPlugin {
    pub fn new(snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.into(),
        }
    }
}

#[async_trait]
impl VolumePlugin for HostPathPlugin {
    #[instrument(skip(self, volume))]
    async fn snapshot_create(
        &self,
        volume: &PersistentVolumeSpec,
    ) -> Result<VolumeSnapshotDataSource, SnapshotError> {
        let PersistentVolumeSource::HostPath { path } = &volume.source else {
            return Err(SnapshotError::Backend(
                "hostpath plugin invoked for a non-hostpath volume".to_owned(),
            ));
        };

        tokio::fs::create_dir_all(&self.snapshot_dir)
            .await
            .map_err(SnapshotError::backend)?;

        let archive = self
            .snapshot_dir
            .join(format!("{}.tgz", Uuid::new_v4()));

        // Each attempt writes a fresh uuid-named archive, so a retry after a
        // partial failure never collides with an earlier attempt's output.
        let status = tokio::process::Command::new("tar")
            .arg("czf")
            .arg(&archive)
            .arg("-C")
            .arg(path)
            .arg(".")
            .status()
            .await
            .map_err(SnapshotError::backend)?;

        if !status.success() {
            return Err(SnapshotError::Backend(format!(
                "tar exited with {:?} archiving {path}",
                status.code()
            )));
        }

        info!(volume = %path, archive = %archive.display(), "hostpath snapshot created");
        Ok(VolumeSnapshotDataSource::HostPath {
            path: archive.to_string_lossy().into_owned(),
        })
    }

    #[instrument(skip(self, source, _volume))]
    async fn snapshot_delete(
        &self,
        source: &VolumeSnapshotDataSource,
        _volume: Option<&PersistentVolume>,
    ) -> Result<(), SnapshotError> {
        let VolumeSnapshotDataSource::HostPath { path } = source else {
            return Err(SnapshotError::Backend(
                "hostpath plugin invoked for a non-hostpath snapshot".to_owned(),
            ));
        };

        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(archive = %path, "hostpath snapshot deleted");
                Ok(())
            }
            // Already gone: treat as success so retries converge.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(archive = %path, "hostpath snapshot already absent");
                Ok(())
            }
            Err(e) => Err(SnapshotError::backend(e)),
        }
    }
}
