//! Keyed async-operation executor with exponential backoff.
//!
//! [`OperationMap`] guarantees that at most one task runs per
//! [`OperationKey`] at any time and that a failed task is not retried under
//! the same key until its exponential-backoff window has elapsed. Scheduling
//! is non-blocking: accepted operations run as detached Tokio tasks and their
//! results are only observable through tracing and external state, never
//! through the [`OperationMap::run`] return value.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// First delay after an operation fails.
pub const INITIAL_DURATION_BEFORE_RETRY: Duration = Duration::from_millis(500);
/// Upper bound on the delay between retries of a failing operation.
pub const MAX_DURATION_BEFORE_RETRY: Duration = Duration::from_secs(2 * 60 + 2);

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Lifecycle operation kinds. Operations of different kinds on the same
/// snapshot never collide on the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Delete,
    Promote,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Promote => "promote",
        })
    }
}

/// Deduplication key for a lifecycle operation.
///
/// The key is structured rather than a concatenated string, so distinct
/// (snapshot, claim) pairs can never alias each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub kind: OperationKind,
    pub snapshot_name: String,
    pub claim_name: String,
}

impl OperationKey {
    pub fn new(
        kind: OperationKind,
        snapshot_name: impl Into<String>,
        claim_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            snapshot_name: snapshot_name.into(),
            claim_name: claim_name.into(),
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.snapshot_name, self.claim_name)
    }
}

// ---------------------------------------------------------------------------
// Scheduling outcomes
// ---------------------------------------------------------------------------

/// Why an operation was not scheduled. These are informational outcomes, not
/// operation failures.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// A task under this key is currently executing.
    #[error("operation {0} is already running")]
    AlreadyExists(String),

    /// The previous task under this key failed and its backoff window is
    /// still open.
    #[error("operation {key} failed previously ({last_error}), retry allowed in {remaining:?}")]
    Backoff {
        key: String,
        last_error: String,
        remaining: Duration,
    },
}

// ---------------------------------------------------------------------------
// Per-key state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ExponentialBackoff {
    last_error: String,
    /// Delay that was applied after the most recent failure.
    duration: Duration,
    /// Earliest instant the key may run again.
    not_before: Instant,
}

#[derive(Debug, Default)]
struct Operation {
    running: bool,
    backoff: Option<ExponentialBackoff>,
}

struct Inner {
    operations: Mutex<HashMap<OperationKey, Operation>>,
    completed: Notify,
    backoff_on_error: bool,
    initial_backoff: Duration,
    max_backoff: Duration,
}

// ---------------------------------------------------------------------------
// OperationMap
// ---------------------------------------------------------------------------

/// Keyed operation registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct OperationMap {
    inner: Arc<Inner>,
}

impl OperationMap {
    /// Create a registry. With `backoff_on_error` set, a failed key may only
    /// re-run after an exponentially growing delay; without it, failure state
    /// is discarded and the key is immediately eligible again.
    pub fn new(backoff_on_error: bool) -> Self {
        Self::with_backoff(
            backoff_on_error,
            INITIAL_DURATION_BEFORE_RETRY,
            MAX_DURATION_BEFORE_RETRY,
        )
    }

    /// Create a registry with custom backoff bounds.
    pub fn with_backoff(backoff_on_error: bool, initial: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                operations: Mutex::new(HashMap::new()),
                completed: Notify::new(),
                backoff_on_error,
                initial_backoff: initial,
                max_backoff: max,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationKey, Operation>> {
        // A poisoned lock means a task panicked while updating bookkeeping;
        // the map contents are still simple values, so keep going.
        self.inner
            .operations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attempt to start `operation` asynchronously under `key`.
    ///
    /// Returns `Ok(())` when the task was spawned. This means scheduling
    /// succeeded, not that the operation itself succeeded: the operation's
    /// own error is captured for backoff bookkeeping and tracing only.
    /// Callers that need the result must poll external state.
    pub fn run<F, E>(&self, key: OperationKey, operation: F) -> Result<(), ScheduleError>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display,
    {
        {
            let mut operations = self.lock();
            let entry = operations.entry(key.clone()).or_default();
            if entry.running {
                return Err(ScheduleError::AlreadyExists(key.to_string()));
            }
            if self.inner.backoff_on_error
                && let Some(backoff) = &entry.backoff
            {
                let now = Instant::now();
                if now < backoff.not_before {
                    return Err(ScheduleError::Backoff {
                        key: key.to_string(),
                        last_error: backoff.last_error.clone(),
                        remaining: backoff.not_before - now,
                    });
                }
            }
            entry.running = true;
        }

        let map = self.clone();
        tokio::spawn(async move {
            let result = operation.await.map_err(|e| e.to_string());
            map.complete(&key, result);
        });
        Ok(())
    }

    /// `true` when a task is currently executing under `key`.
    pub fn is_running(&self, key: &OperationKey) -> bool {
        self.lock().get(key).is_some_and(|op| op.running)
    }

    /// Number of keys with recorded state (running or in backoff).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when no key has recorded state.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait until no task is executing. Keys in backoff do not count as
    /// executing; they only gate future `run` calls.
    pub async fn wait(&self) {
        loop {
            // Register for notification before checking, otherwise a task
            // completing between the check and the await would be missed.
            let notified = self.inner.completed.notified();
            let any_running = self.lock().values().any(|op| op.running);
            if !any_running {
                return;
            }
            notified.await;
        }
    }

    fn complete(&self, key: &OperationKey, result: Result<(), String>) {
        let mut operations = self.lock();
        match result {
            Ok(()) => {
                debug!(op = %key, "operation completed");
                operations.remove(key);
            }
            Err(error) => {
                warn!(op = %key, %error, "operation failed");
                if !self.inner.backoff_on_error {
                    operations.remove(key);
                } else if let Some(entry) = operations.get_mut(key) {
                    let duration = match &entry.backoff {
                        Some(previous) => {
                            (previous.duration * 2).min(self.inner.max_backoff)
                        }
                        None => self.inner.initial_backoff,
                    };
                    entry.running = false;
                    entry.backoff = Some(ExponentialBackoff {
                        last_error: error,
                        duration,
                        not_before: Instant::now() + duration,
                    });
                }
            }
        }
        drop(operations);
        self.inner.completed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    fn key(name: &str) -> OperationKey {
        OperationKey::new(OperationKind::Create, name, "pvc-1")
    }

    /// Poll until `predicate` holds, failing the test after two seconds.
    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !predicate() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn fast_map() -> OperationMap {
        OperationMap::with_backoff(true, Duration::from_millis(50), Duration::from_millis(400))
    }

    #[tokio::test]
    async fn second_run_under_same_key_is_rejected() {
        let map = OperationMap::new(true);
        let (release, gate) = oneshot::channel::<()>();

        map.run(key("default/snap-1"), async move {
            let _ = gate.await;
            Ok::<(), SnapshotErrorStub>(())
        })
        .expect("first run schedules");
        assert!(map.is_running(&key("default/snap-1")));

        let outcome = map.run(key("default/snap-1"), async { Ok::<(), SnapshotErrorStub>(()) });
        assert!(matches!(outcome, Err(ScheduleError::AlreadyExists(_))));

        release.send(()).expect("task is waiting");
        wait_until(|| !map.is_running(&key("default/snap-1"))).await;

        // The key is free again after successful completion.
        map.run(key("default/snap-1"), async { Ok::<(), SnapshotErrorStub>(()) })
            .expect("key cleared after success");
    }

    #[tokio::test]
    async fn distinct_keys_run_concurrently() {
        let map = OperationMap::new(true);
        let (release_a, gate_a) = oneshot::channel::<()>();
        let (release_b, gate_b) = oneshot::channel::<()>();

        map.run(key("default/a"), async move {
            let _ = gate_a.await;
            Ok::<(), SnapshotErrorStub>(())
        })
        .expect("a schedules");
        map.run(key("default/b"), async move {
            let _ = gate_b.await;
            Ok::<(), SnapshotErrorStub>(())
        })
        .expect("b schedules while a is running");

        assert!(map.is_running(&key("default/a")));
        assert!(map.is_running(&key("default/b")));

        release_a.send(()).expect("a waiting");
        release_b.send(()).expect("b waiting");
        wait_until(|| map.is_empty()).await;
    }

    #[tokio::test]
    async fn failure_opens_backoff_window() {
        let map = fast_map();
        let k = key("default/snap-1");

        map.run(k.clone(), async { Err(SnapshotErrorStub) })
            .expect("first run schedules");
        wait_until(|| !map.is_running(&k)).await;

        // Immediately after the failure the key is in backoff.
        let outcome = map.run(k.clone(), async { Ok::<(), SnapshotErrorStub>(()) });
        match outcome {
            Err(ScheduleError::Backoff { remaining, .. }) => {
                assert!(remaining <= Duration::from_millis(50));
            }
            other => panic!("expected backoff, got {other:?}"),
        }

        // Once the window elapses a new task starts.
        sleep(Duration::from_millis(60)).await;
        map.run(k.clone(), async { Ok::<(), SnapshotErrorStub>(()) })
            .expect("backoff elapsed");
        wait_until(|| map.is_empty()).await;

        // Success cleared the failure state: no backoff on the next run.
        map.run(k, async { Ok::<(), SnapshotErrorStub>(()) })
            .expect("no residual backoff after success");
    }

    #[tokio::test]
    async fn backoff_grows_on_repeated_failure() {
        let map = OperationMap::with_backoff(
            true,
            Duration::from_millis(100),
            Duration::from_millis(800),
        );
        let k = key("default/snap-1");

        map.run(k.clone(), async { Err(SnapshotErrorStub) })
            .expect("schedules");
        wait_until(|| !map.is_running(&k)).await;

        sleep(Duration::from_millis(110)).await;
        map.run(k.clone(), async { Err(SnapshotErrorStub) })
            .expect("window elapsed");
        wait_until(|| !map.is_running(&k)).await;

        // The second failure doubled the window, so well past the initial
        // delay the key must still be postponed.
        let outcome = map.run(k, async { Ok::<(), SnapshotErrorStub>(()) });
        match outcome {
            Err(ScheduleError::Backoff { remaining, last_error, .. }) => {
                assert!(remaining > Duration::from_millis(110));
                assert_eq!(last_error, "stub operation error");
            }
            other => panic!("expected backoff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn without_backoff_failures_are_forgotten() {
        let map = OperationMap::with_backoff(
            false,
            Duration::from_millis(50),
            Duration::from_millis(400),
        );
        let k = key("default/snap-1");

        map.run(k.clone(), async { Err(SnapshotErrorStub) })
            .expect("schedules");
        wait_until(|| map.is_empty()).await;

        map.run(k, async { Ok::<(), SnapshotErrorStub>(()) })
            .expect("immediately eligible again");
    }

    #[tokio::test]
    async fn wait_drains_running_tasks() {
        let map = OperationMap::new(true);
        let completions = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let completions = Arc::clone(&completions);
            map.run(key(&format!("default/snap-{i}")), async move {
                sleep(Duration::from_millis(20)).await;
                completions.fetch_add(1, Ordering::SeqCst);
                Ok::<(), SnapshotErrorStub>(())
            })
            .expect("schedules");
        }

        timeout(Duration::from_secs(2), map.wait())
            .await
            .expect("wait returns once tasks drain");
        assert_eq!(completions.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn keys_do_not_alias_across_fields() {
        // A structured key distinguishes (snapshot "a", claim "bc") from
        // (snapshot "ab", claim "c"), which a concatenated key would not.
        let a = OperationKey::new(OperationKind::Create, "a", "bc");
        let b = OperationKey::new(OperationKind::Create, "ab", "c");
        assert_ne!(a, b);

        let map = OperationMap::new(true);
        let (release, gate) = oneshot::channel::<()>();
        map.run(a, async move {
            let _ = gate.await;
            Ok::<(), SnapshotErrorStub>(())
        })
        .expect("schedules");
        map.run(b, async { Ok::<(), SnapshotErrorStub>(()) })
            .expect("different key is not blocked");
        release.send(()).expect("task waiting");
        wait_until(|| map.is_empty()).await;
    }

    #[derive(Debug)]
    struct SnapshotErrorStub;

    impl fmt::Display for SnapshotErrorStub {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("stub operation error")
        }
    }
}
