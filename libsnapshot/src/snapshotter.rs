//! The volume snapshotter reconciliation engine.
//!
//! [`VolumeSnapshotter`] drives declared [`VolumeSnapshot`] objects toward
//! reality: it schedules create/delete/promote work through the
//! [`OperationMap`] so at most one task runs per key, invokes the volume
//! plugin for the backend work, persists the resulting
//! [`VolumeSnapshotData`] record, and keeps the [`ActualStateOfWorld`] cache
//! in sync with confirmed effects.
//!
//! The fire-and-forget entry points never block on, or surface, the
//! operation's outcome; failed operations are retried on the next trigger
//! once their backoff window elapses. Every step must therefore tolerate
//! re-running after a partial failure.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::api::{
    Condition, ObjectMeta, ObjectRef, PersistentVolume, VolumeSnapshotData,
    VolumeSnapshotDataSource, VolumeSnapshotDataSpec, VolumeSnapshotDataStatus,
    VolumeSnapshotSpec, ClaimPhase,
};
use crate::cache::{ActualStateOfWorld, split_snapshot_name};
use crate::error::SnapshotError;
use crate::opmap::{OperationKey, OperationKind, OperationMap, ScheduleError};
use crate::store::{CoreClient, SnapshotStore};
use crate::volume::{self, VolumePluginRegistry};

/// Message stamped into Ready conditions by the create path.
const READY_MESSAGE: &str = "snapshot created successfully";

/// The reconciliation engine. Owns the operation registry and the actual
/// state of world for the lifetime of the process; both are rebuilt from
/// scratch on restart.
pub struct VolumeSnapshotter {
    store: Arc<dyn SnapshotStore>,
    core: Arc<dyn CoreClient>,
    plugins: Arc<VolumePluginRegistry>,
    actual_state: Arc<ActualStateOfWorld>,
    running: OperationMap,
}

impl VolumeSnapshotter {
    /// Build an engine over the given collaborators. Failed operations back
    /// off exponentially before the same key may run again.
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        core: Arc<dyn CoreClient>,
        plugins: Arc<VolumePluginRegistry>,
        actual_state: Arc<ActualStateOfWorld>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            core,
            plugins,
            actual_state,
            running: OperationMap::new(true),
        })
    }

    /// The engine's view of which snapshots are realized.
    pub fn actual_state(&self) -> &ActualStateOfWorld {
        &self.actual_state
    }

    /// Wait until no scheduled operation is executing. Used for graceful
    /// drain on shutdown; in-flight tasks are never cancelled.
    pub async fn wait(&self) {
        self.running.wait().await;
    }

    // -----------------------------------------------------------------------
    // Fire-and-forget triggers
    // -----------------------------------------------------------------------

    /// Schedule creation of the snapshot described by `spec`.
    pub fn create_volume_snapshot(self: &Arc<Self>, snapshot_name: &str, spec: &VolumeSnapshotSpec) {
        let key = OperationKey::new(
            OperationKind::Create,
            snapshot_name,
            &spec.persistent_volume_claim_name,
        );
        debug!(op = %key, "scheduling snapshot create");

        let this = Arc::clone(self);
        let name = snapshot_name.to_owned();
        let spec = spec.clone();
        let outcome = self
            .running
            .run(key.clone(), async move { this.run_create(&name, &spec).await });
        log_schedule_outcome(&key, outcome);
    }

    /// Schedule deletion of the snapshot described by `spec`.
    pub fn delete_volume_snapshot(self: &Arc<Self>, snapshot_name: &str, spec: &VolumeSnapshotSpec) {
        let key = OperationKey::new(
            OperationKind::Delete,
            snapshot_name,
            &spec.persistent_volume_claim_name,
        );
        debug!(op = %key, "scheduling snapshot delete");

        let this = Arc::clone(self);
        let name = snapshot_name.to_owned();
        let spec = spec.clone();
        let outcome = self
            .running
            .run(key.clone(), async move { this.run_delete(&name, &spec).await });
        log_schedule_outcome(&key, outcome);
    }

    /// Schedule promotion of the snapshot to a standalone volume.
    pub fn promote_volume_snapshot_to_pv(
        self: &Arc<Self>,
        snapshot_name: &str,
        spec: &VolumeSnapshotSpec,
    ) {
        let key = OperationKey::new(
            OperationKind::Promote,
            snapshot_name,
            &spec.persistent_volume_claim_name,
        );
        debug!(op = %key, "scheduling snapshot promote");

        let this = Arc::clone(self);
        let name = snapshot_name.to_owned();
        let outcome = self
            .running
            .run(key.clone(), async move { this.run_promote(&name).await });
        log_schedule_outcome(&key, outcome);
    }

    // -----------------------------------------------------------------------
    // Operation bodies
    // -----------------------------------------------------------------------

    /// The create state machine. Idempotent: a spec that already references
    /// its data object short-circuits to a cache update, so a retried create
    /// never produces a second backing artifact once the first pass has been
    /// persisted and rebound.
    pub(crate) async fn run_create(
        &self,
        snapshot_name: &str,
        spec: &VolumeSnapshotSpec,
    ) -> Result<(), SnapshotError> {
        if let Some(data_name) = spec.bound_data_name() {
            // Admin-imported or already reconciled: nothing to do on the
            // backend, just record it as realized.
            self.actual_state.add_snapshot(snapshot_name, spec);
            info!(snapshot = %snapshot_name, data = %data_name, "snapshot already bound to data object");
            return Ok(());
        }

        let volume = self.volume_from_snapshot(snapshot_name, spec).await?;
        let source = self.take_snapshot(&volume).await?;

        let data = VolumeSnapshotData {
            metadata: ObjectMeta::named(format!("snapshot-data-{}", Uuid::new_v4())),
            spec: VolumeSnapshotDataSpec {
                volume_snapshot_ref: Some(ObjectRef::snapshot(snapshot_name)),
                persistent_volume_ref: Some(ObjectRef::volume(&volume.metadata.name)),
                source,
            },
            status: VolumeSnapshotDataStatus {
                conditions: vec![Condition::ready(READY_MESSAGE)],
            },
        };

        // At-least-once by design: if this write fails the backend snapshot
        // is NOT rolled back and reconciliation still proceeds below. The
        // cache then claims a snapshot no durable record describes until a
        // later trigger re-runs the create.
        if let Err(e) = self.store.create_snapshot_data(&data).await {
            error!(snapshot = %snapshot_name, data = %data.metadata.name, error = %e,
                "failed to persist snapshot data object");
        }

        self.actual_state.add_snapshot(snapshot_name, spec);

        if let Err(e) = self.update_volume_snapshot(snapshot_name).await {
            error!(snapshot = %snapshot_name, error = %e, "failed to update snapshot object");
        }

        Ok(())
    }

    /// The delete state machine. A missing data object is a hard error, not
    /// an already-deleted success: the cache entry stays put so the condition
    /// remains observable.
    pub(crate) async fn run_delete(
        &self,
        snapshot_name: &str,
        spec: &VolumeSnapshotSpec,
    ) -> Result<(), SnapshotError> {
        let data = self.snapshot_data_for(snapshot_name).await?;
        let volume = self.volume_from_snapshot(snapshot_name, spec).await?;

        let plugin = volume::plugin_for(&self.plugins, &volume.spec)?;
        plugin
            .snapshot_delete(&data.spec.source, Some(&volume))
            .await?;

        self.store
            .delete_snapshot_data(&data.metadata.name)
            .await
            .map_err(|e| SnapshotError::persist(&data.metadata.name, e))?;

        self.actual_state.delete_snapshot(snapshot_name);
        info!(snapshot = %snapshot_name, data = %data.metadata.name, "snapshot deleted");
        Ok(())
    }

    /// Promotion placeholder. The intended steps are: locate the data object
    /// for the snapshot, ask the backend to materialize a new volume from the
    /// backing artifact, and bind that volume to the requesting claim. Until
    /// a backend grows that capability this operation is a logged no-op; it
    /// is still scheduled and deduplicated under its own key kind.
    pub(crate) async fn run_promote(&self, snapshot_name: &str) -> Result<(), SnapshotError> {
        warn!(snapshot = %snapshot_name, "snapshot promotion is not implemented");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Synchronous reconcile of the parent object
    // -----------------------------------------------------------------------

    /// Bind the snapshot object to its data object and mark it Ready.
    ///
    /// Fetches a fresh copy from the store, mutates only that copy, and
    /// writes it back wholesale. The write is unversioned, so a concurrent
    /// writer outside this engine can be overwritten.
    #[instrument(skip(self))]
    pub async fn update_volume_snapshot(&self, snapshot_name: &str) -> Result<(), SnapshotError> {
        let (namespace, name) = split_snapshot_name(snapshot_name)?;
        let mut snapshot = self.store.get_snapshot(namespace, name).await?;

        let data = self.snapshot_data_for(snapshot_name).await?;
        snapshot.spec.snapshot_data_name = Some(data.metadata.name.clone());
        snapshot.status.conditions = vec![Condition::ready(READY_MESSAGE)];

        self.store
            .update_snapshot(&snapshot)
            .await
            .map_err(|e| SnapshotError::persist(snapshot_name, e))?;

        self.actual_state.add_snapshot(snapshot_name, &snapshot.spec);
        debug!(snapshot = %snapshot_name, data = %data.metadata.name, "snapshot object updated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Resolve the volume bound to the snapshot's claim.
    async fn volume_from_snapshot(
        &self,
        snapshot_name: &str,
        spec: &VolumeSnapshotSpec,
    ) -> Result<PersistentVolume, SnapshotError> {
        let claim_name = &spec.persistent_volume_claim_name;
        if claim_name.is_empty() {
            return Err(SnapshotError::ClaimNotSpecified(snapshot_name.to_owned()));
        }
        let (namespace, _) = split_snapshot_name(snapshot_name)?;

        let claim = self
            .core
            .get_claim(namespace, claim_name)
            .await
            .map_err(|e| SnapshotError::ClaimNotFound {
                claim: claim_name.clone(),
                reason: e.to_string(),
            })?;

        if claim.status.phase != ClaimPhase::Bound {
            return Err(SnapshotError::ClaimNotBound(claim_name.clone()));
        }

        let volume_name = &claim.spec.volume_name;
        self.core
            .get_volume(volume_name)
            .await
            .map_err(|e| SnapshotError::VolumeNotFound {
                volume: volume_name.clone(),
                reason: e.to_string(),
            })
    }

    /// Find the data object back-referencing `snapshot_name` by scanning the
    /// full collection.
    async fn snapshot_data_for(
        &self,
        snapshot_name: &str,
    ) -> Result<VolumeSnapshotData, SnapshotError> {
        let items = self.store.list_snapshot_data().await?;
        items
            .into_iter()
            .find(|data| {
                data.spec
                    .volume_snapshot_ref
                    .as_ref()
                    .is_some_and(|r| r.name == snapshot_name)
            })
            .ok_or_else(|| SnapshotError::SnapshotDataNotFound(snapshot_name.to_owned()))
    }

    /// Select the plugin for the volume and ask it to take the snapshot.
    async fn take_snapshot(
        &self,
        volume: &PersistentVolume,
    ) -> Result<VolumeSnapshotDataSource, SnapshotError> {
        let plugin = volume::plugin_for(&self.plugins, &volume.spec)?;
        plugin
            .snapshot_create(&volume.spec)
            .await
            .map_err(|e| SnapshotError::SnapshotCreationFailed {
                volume: volume.metadata.name.clone(),
                reason: e.to_string(),
            })
    }
}

/// Scheduling outcomes are informational: a duplicate or postponed trigger is
/// normal controller churn, only unexpected states deserve attention.
fn log_schedule_outcome(key: &OperationKey, outcome: Result<(), ScheduleError>) {
    match outcome {
        Ok(()) => {}
        Err(e @ ScheduleError::AlreadyExists(_)) => {
            debug!(op = %key, "{e}, skipping");
        }
        Err(e @ ScheduleError::Backoff { .. }) => {
            debug!(op = %key, "{e}");
        }
    }
}
