//! Thin periodic controller loop.
//!
//! The loop is deliberately dumb: on every tick it diffs the declared
//! snapshots in the store against the engine's actual state of world and
//! fires the snapshotter's public operations for the differences. All
//! deduplication, retry, and backoff logic lives in the engine; calling an
//! operation that is already running or in backoff is harmless.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use libsnapshot::cache::ActualStateOfWorld;
use libsnapshot::error::SnapshotError;
use libsnapshot::snapshotter::VolumeSnapshotter;
use libsnapshot::store::SnapshotStore;

/// Default resync period, matching the controller's historical cadence.
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(60);

/// Periodic reconciliation driver over a [`VolumeSnapshotter`].
pub struct SnapshotController {
    snapshotter: Arc<VolumeSnapshotter>,
    store: Arc<dyn SnapshotStore>,
    actual_state: Arc<ActualStateOfWorld>,
    sync_period: Duration,
}

impl SnapshotController {
    pub fn new(
        snapshotter: Arc<VolumeSnapshotter>,
        store: Arc<dyn SnapshotStore>,
        actual_state: Arc<ActualStateOfWorld>,
        sync_period: Duration,
    ) -> Self {
        Self {
            snapshotter,
            store,
            actual_state,
            sync_period,
        }
    }

    /// Run sync passes until `shutdown` flips to `true`. In-flight engine
    /// tasks are not cancelled; the caller drains them separately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.sync_period);
        info!(period = ?self.sync_period, "snapshot controller started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        error!(error = %e, "sync pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("snapshot controller stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One reconciliation pass: schedule creates for declared snapshots the
    /// engine has not realized, and deletes for realized snapshots that are
    /// no longer declared.
    pub async fn sync_once(&self) -> Result<(), SnapshotError> {
        let desired = self.store.list_snapshots(None).await?;

        let mut desired_names = HashSet::with_capacity(desired.len());
        for snapshot in &desired {
            let name = snapshot.metadata.qualified_name();
            desired_names.insert(name.clone());
            if !self.actual_state.snapshot_exists(&name) {
                self.snapshotter.create_volume_snapshot(&name, &snapshot.spec);
            }
        }

        for name in self.actual_state.snapshot_names() {
            if desired_names.contains(&name) {
                continue;
            }
            // The declared object is gone; delete using the spec the engine
            // last realized, which is the only copy left.
            match self.actual_state.get_snapshot(&name) {
                Some(spec) => self.snapshotter.delete_volume_snapshot(&name, &spec),
                None => debug!(snapshot = %name, "entry vanished mid-sync, skipping"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use libsnapshot::api::{
        ClaimPhase, ObjectMeta, PersistentVolume, PersistentVolumeClaim,
        PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeSource,
        PersistentVolumeSpec, VolumeSnapshot, VolumeSnapshotSpec, VolumeSnapshotStatus,
    };
    use libsnapshot::store::MemoryStore;
    use libsnapshot::volume::{HostPathPlugin, VolumePluginRegistry};

    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !predicate() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn controller_fixture(
        data_dir: &std::path::Path,
        snap_dir: &std::path::Path,
    ) -> (SnapshotController, Arc<MemoryStore>, Arc<ActualStateOfWorld>) {
        let store = Arc::new(MemoryStore::new());
        store.put_claim(PersistentVolumeClaim {
            metadata: ObjectMeta::namespaced("default", "pvc-1"),
            spec: PersistentVolumeClaimSpec {
                volume_name: "pv-1".into(),
            },
            status: PersistentVolumeClaimStatus {
                phase: ClaimPhase::Bound,
            },
        });
        store.put_volume(PersistentVolume {
            metadata: ObjectMeta::named("pv-1"),
            spec: PersistentVolumeSpec {
                source: PersistentVolumeSource::HostPath {
                    path: data_dir.to_string_lossy().into_owned(),
                },
            },
        });

        let mut registry = VolumePluginRegistry::new();
        registry.insert(
            "hostPath".to_owned(),
            Arc::new(HostPathPlugin::new(snap_dir)) as _,
        );

        let actual_state = Arc::new(ActualStateOfWorld::new());
        let snapshotter = VolumeSnapshotter::new(
            store.clone(),
            store.clone(),
            Arc::new(registry),
            actual_state.clone(),
        );
        let controller = SnapshotController::new(
            snapshotter,
            store.clone(),
            actual_state.clone(),
            DEFAULT_SYNC_PERIOD,
        );
        (controller, store, actual_state)
    }

    #[tokio::test]
    async fn sync_reconciles_declared_and_undeclared_snapshots() {
        let data_dir = tempfile::tempdir().unwrap();
        std::fs::write(data_dir.path().join("file.txt"), b"payload").unwrap();
        let snap_dir = tempfile::tempdir().unwrap();
        let (controller, store, actual_state) =
            controller_fixture(data_dir.path(), snap_dir.path());

        store.put_snapshot(VolumeSnapshot {
            metadata: ObjectMeta::namespaced("default", "snap-1"),
            spec: VolumeSnapshotSpec {
                persistent_volume_claim_name: "pvc-1".into(),
                snapshot_data_name: None,
            },
            status: VolumeSnapshotStatus::default(),
        });

        // First pass schedules the create; wait for the engine to realize it.
        controller.sync_once().await.unwrap();
        wait_until(|| actual_state.snapshot_exists("default/snap-1")).await;
        controller.snapshotter.wait().await;
        assert_eq!(store.list_snapshot_data().await.unwrap().len(), 1);

        // Undeclare the snapshot; the next pass schedules the delete.
        store.remove_snapshot("default", "snap-1");
        controller.sync_once().await.unwrap();
        wait_until(|| !actual_state.snapshot_exists("default/snap-1")).await;
        controller.snapshotter.wait().await;
        assert!(store.list_snapshot_data().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_is_quiet_when_converged() {
        let data_dir = tempfile::tempdir().unwrap();
        let snap_dir = tempfile::tempdir().unwrap();
        let (controller, _store, actual_state) =
            controller_fixture(data_dir.path(), snap_dir.path());

        controller.sync_once().await.unwrap();
        controller.snapshotter.wait().await;
        assert!(actual_state.is_empty());
    }
}
