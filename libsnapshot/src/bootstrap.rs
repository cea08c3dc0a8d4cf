//! Startup polling helpers.
//!
//! The snapshot resource is registered with the control plane out-of-band;
//! until that registration is processed, reads fail with not-found. These
//! helpers let the daemon wait for the resource to be served before starting
//! the controller loop, and let callers wait for an individual snapshot to
//! become Ready.

use std::time::Duration;

use tokio::time::{Instant, interval};
use tracing::debug;

use crate::error::SnapshotError;
use crate::store::SnapshotStore;

/// Default poll interval while waiting for the resource to be served.
pub const RESOURCE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default deadline for the resource to be served.
pub const RESOURCE_POLL_TIMEOUT: Duration = Duration::from_secs(60);
/// Default deadline for a snapshot to report Ready.
pub const SNAPSHOT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll until the snapshot resource is served by the store.
///
/// Not-found is the retryable not-ready signal here; any other store error is
/// fatal. Fails with [`SnapshotError::Timeout`] when `timeout` elapses first.
pub async fn wait_for_snapshot_resource(
    store: &dyn SnapshotStore,
    poll: Duration,
    timeout: Duration,
) -> Result<(), SnapshotError> {
    let deadline = Instant::now() + timeout;
    let mut ticker = interval(poll);
    loop {
        ticker.tick().await;
        match store.list_snapshots(None).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("snapshot resource not served yet");
            }
            Err(e) => return Err(SnapshotError::Store(e)),
        }
        if Instant::now() >= deadline {
            return Err(SnapshotError::Timeout(
                "snapshot resource to be served".to_owned(),
            ));
        }
    }
}

/// Poll until the named snapshot carries a Ready/True condition.
///
/// Any store error aborts the wait; fails with [`SnapshotError::Timeout`]
/// when `timeout` elapses first.
pub async fn wait_for_snapshot_ready(
    store: &dyn SnapshotStore,
    namespace: &str,
    name: &str,
    poll: Duration,
    timeout: Duration,
) -> Result<(), SnapshotError> {
    let deadline = Instant::now() + timeout;
    let mut ticker = interval(poll);
    loop {
        ticker.tick().await;
        let snapshot = store.get_snapshot(namespace, name).await?;
        if snapshot.status.is_ready() {
            return Ok(());
        }
        debug!(snapshot = %name, "snapshot not ready yet");
        if Instant::now() >= deadline {
            return Err(SnapshotError::Timeout(format!(
                "snapshot {namespace}/{name} to become ready"
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::{Condition, ObjectMeta, VolumeSnapshot, VolumeSnapshotSpec, VolumeSnapshotStatus};
    use crate::store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn resource_wait_returns_once_served() {
        let store = Arc::new(MemoryStore::not_installed());

        let flipper = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flipper.set_installed(true);
        });

        wait_for_snapshot_resource(
            store.as_ref(),
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .await
        .expect("resource served after flip");
    }

    #[tokio::test(start_paused = true)]
    async fn resource_wait_times_out() {
        let store = MemoryStore::not_installed();
        let err = wait_for_snapshot_resource(
            &store,
            Duration::from_millis(10),
            Duration::from_millis(100),
        )
        .await
        .expect_err("never served");
        assert!(matches!(err, SnapshotError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_observes_condition() {
        let store = Arc::new(MemoryStore::new());
        store.put_snapshot(VolumeSnapshot {
            metadata: ObjectMeta::namespaced("default", "snap-1"),
            spec: VolumeSnapshotSpec::default(),
            status: VolumeSnapshotStatus::default(),
        });

        let marker = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            marker.put_snapshot(VolumeSnapshot {
                metadata: ObjectMeta::namespaced("default", "snap-1"),
                spec: VolumeSnapshotSpec::default(),
                status: VolumeSnapshotStatus {
                    conditions: vec![Condition::ready("ok")],
                },
            });
        });

        wait_for_snapshot_ready(
            store.as_ref(),
            "default",
            "snap-1",
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .await
        .expect("ready after status write");
    }

    #[tokio::test(start_paused = true)]
    async fn ready_wait_aborts_on_missing_snapshot() {
        let store = MemoryStore::new();
        let err = wait_for_snapshot_ready(
            &store,
            "default",
            "ghost",
            Duration::from_millis(10),
            Duration::from_secs(1),
        )
        .await
        .expect_err("missing snapshot aborts");
        assert!(matches!(err, SnapshotError::Store(_)));
    }
}
