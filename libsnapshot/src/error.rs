//! Snapshot controller error types.
//!
//! All failures in the `libsnapshot` crate are represented by the
//! [`SnapshotError`] enum, which derives [`thiserror::Error`] for ergonomic
//! error handling. Scheduling outcomes of the operation registry are a
//! separate type ([`crate::opmap::ScheduleError`]) because they are not
//! operation failures.

use thiserror::Error;

use crate::store::StoreError;

/// Unified error type for snapshot lifecycle operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A snapshot identity string did not parse as `namespace/name`.
    #[error("snapshot name {0} is malformed, expected namespace/name")]
    MalformedSnapshotName(String),

    /// The snapshot spec does not reference a claim.
    #[error("no claim name specified in snapshot {0}")]
    ClaimNotSpecified(String),

    /// The referenced claim could not be retrieved.
    #[error("failed to retrieve claim {claim}: {reason}")]
    ClaimNotFound {
        /// Name of the claim that was looked up.
        claim: String,
        /// Underlying lookup failure.
        reason: String,
    },

    /// The referenced claim is not bound to a volume yet.
    #[error("claim {0} is not yet bound to a volume, will not snapshot yet")]
    ClaimNotBound(String),

    /// The volume bound to the claim could not be retrieved.
    #[error("failed to retrieve volume {volume}: {reason}")]
    VolumeNotFound {
        /// Name of the volume that was looked up.
        volume: String,
        /// Underlying lookup failure.
        reason: String,
    },

    /// No volume plugin is registered for the volume's type tag.
    #[error("no volume plugin registered for volume type {0}")]
    UnsupportedVolumeType(String),

    /// The backend plugin failed to take the snapshot.
    #[error("failed to take snapshot of volume {volume}: {reason}")]
    SnapshotCreationFailed {
        /// Name of the volume being snapshotted.
        volume: String,
        /// Backend-reported failure.
        reason: String,
    },

    /// No snapshot data object references the given snapshot.
    #[error("no snapshot data object found for snapshot {0}")]
    SnapshotDataNotFound(String),

    /// A control-plane write failed.
    #[error("failed to persist {object}: {reason}")]
    PersistFailed {
        /// The object whose write failed.
        object: String,
        /// Underlying store failure.
        reason: String,
    },

    /// A storage-backend operation failed.
    #[error("backend error: {0}")]
    Backend(String),

    /// A control-plane read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A bootstrap wait exceeded its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl SnapshotError {
    /// Create a [`SnapshotError::Backend`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::Backend(e.to_string())
    }

    /// Create a [`SnapshotError::PersistFailed`] for `object`.
    pub fn persist<E: std::fmt::Display>(object: impl Into<String>, e: E) -> Self {
        Self::PersistFailed {
            object: object.into(),
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SnapshotError::MalformedSnapshotName("snap-1".into());
        assert_eq!(
            err.to_string(),
            "snapshot name snap-1 is malformed, expected namespace/name"
        );

        let err = SnapshotError::UnsupportedVolumeType("cephfs".into());
        assert!(err.to_string().contains("cephfs"));
    }

    #[test]
    fn store_error_is_transparent() {
        let err = SnapshotError::from(StoreError::not_found("volumesnapshots", "default/snap-1"));
        assert_eq!(err.to_string(), "volumesnapshots default/snap-1 not found");
    }
}
