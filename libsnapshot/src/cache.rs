//! Actual state of world cache.
//!
//! [`ActualStateOfWorld`] is the engine's local belief about which snapshots
//! currently exist and are realized. It is a point-in-time hint, not
//! authoritative state (the control-plane store is), and is rebuilt from
//! scratch on every process start.

use dashmap::DashMap;

use crate::api::VolumeSnapshotSpec;
use crate::error::SnapshotError;

/// Split a `namespace/name` snapshot identity into its parts.
///
/// Both parts must be non-empty. An identity that does not round-trip through
/// [`join_snapshot_name`] is rejected as malformed.
pub fn split_snapshot_name(snapshot_name: &str) -> Result<(&str, &str), SnapshotError> {
    match snapshot_name.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => Err(SnapshotError::MalformedSnapshotName(
            snapshot_name.to_owned(),
        )),
    }
}

/// Encode a namespace and name as the `namespace/name` identity used as the
/// snapshot key throughout the engine.
pub fn join_snapshot_name(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// In-memory index of realized snapshots, keyed by `namespace/name` identity.
///
/// # Thread safety
///
/// Internally synchronized; all mutation goes through the public operations.
/// Entries are last-writer-wins with no version check, and there is no
/// eviction: the cache lives as long as the process.
#[derive(Debug, Default)]
pub struct ActualStateOfWorld {
    snapshots: DashMap<String, VolumeSnapshotSpec>,
}

impl ActualStateOfWorld {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `snapshot_name` unconditionally.
    pub fn add_snapshot(&self, snapshot_name: &str, spec: &VolumeSnapshotSpec) {
        self.snapshots
            .insert(snapshot_name.to_owned(), spec.clone());
    }

    /// Remove the entry for `snapshot_name`. Not an error if absent.
    pub fn delete_snapshot(&self, snapshot_name: &str) {
        self.snapshots.remove(snapshot_name);
    }

    /// The last spec the engine believes is realized for `snapshot_name`.
    pub fn get_snapshot(&self, snapshot_name: &str) -> Option<VolumeSnapshotSpec> {
        self.snapshots.get(snapshot_name).map(|e| e.value().clone())
    }

    /// `true` when an entry exists for `snapshot_name`.
    pub fn snapshot_exists(&self, snapshot_name: &str) -> bool {
        self.snapshots.contains_key(snapshot_name)
    }

    /// Identities of all cached snapshots.
    pub fn snapshot_names(&self) -> Vec<String> {
        self.snapshots.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(claim: &str) -> VolumeSnapshotSpec {
        VolumeSnapshotSpec {
            persistent_volume_claim_name: claim.into(),
            snapshot_data_name: None,
        }
    }

    #[test]
    fn identity_roundtrip() {
        for identity in ["default/snap-1", "kube-system/a", "ns/with-dashes-1"] {
            let (namespace, name) = split_snapshot_name(identity).expect("valid identity");
            assert_eq!(join_snapshot_name(namespace, name), identity);
        }
    }

    #[test]
    fn malformed_identities_rejected() {
        for identity in ["snap-1", "", "/snap-1", "default/"] {
            let err = split_snapshot_name(identity).expect_err("malformed identity");
            assert!(matches!(err, SnapshotError::MalformedSnapshotName(_)));
        }
    }

    #[test]
    fn extra_separator_stays_in_name() {
        // Only the first separator splits; the rest belongs to the name.
        let (namespace, name) = split_snapshot_name("default/snap/extra").expect("valid");
        assert_eq!(namespace, "default");
        assert_eq!(name, "snap/extra");
    }

    #[test]
    fn add_get_delete() {
        let asw = ActualStateOfWorld::new();
        assert!(asw.is_empty());

        asw.add_snapshot("default/snap-1", &spec("pvc-1"));
        assert!(asw.snapshot_exists("default/snap-1"));
        assert_eq!(
            asw.get_snapshot("default/snap-1")
                .expect("entry exists")
                .persistent_volume_claim_name,
            "pvc-1"
        );

        // Last writer wins, no version check.
        asw.add_snapshot("default/snap-1", &spec("pvc-2"));
        assert_eq!(asw.len(), 1);
        assert_eq!(
            asw.get_snapshot("default/snap-1")
                .expect("entry exists")
                .persistent_volume_claim_name,
            "pvc-2"
        );

        asw.delete_snapshot("default/snap-1");
        assert!(!asw.snapshot_exists("default/snap-1"));

        // Deleting an absent entry is a no-op, not an error.
        asw.delete_snapshot("default/snap-1");
        assert!(asw.is_empty());
    }

    #[test]
    fn snapshot_names_lists_all() {
        let asw = ActualStateOfWorld::new();
        asw.add_snapshot("default/a", &spec("pvc-a"));
        asw.add_snapshot("other/b", &spec("pvc-b"));
        let mut names = asw.snapshot_names();
        names.sort();
        assert_eq!(names, vec!["default/a", "other/b"]);
    }
}
