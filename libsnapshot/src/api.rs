//! Snapshot API object model.
//!
//! These types are the object shapes the reconciliation engine exchanges with
//! the control-plane store: the user-facing [`VolumeSnapshot`], the backing
//! [`VolumeSnapshotData`] record, and the claim/volume subset the engine needs
//! for lookups. They are all [`Serialize`]/[`Deserialize`] with camelCase
//! field names on the wire.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Plural resource name for [`VolumeSnapshot`] objects.
pub const VOLUME_SNAPSHOT_RESOURCE: &str = "volumesnapshots";
/// Plural resource name for [`VolumeSnapshotData`] objects.
pub const VOLUME_SNAPSHOT_DATA_RESOURCE: &str = "volumesnapshotdatas";
/// Plural resource name for claims.
pub const PERSISTENT_VOLUME_CLAIM_RESOURCE: &str = "persistentvolumeclaims";
/// Plural resource name for volumes.
pub const PERSISTENT_VOLUME_RESOURCE: &str = "persistentvolumes";

// ---------------------------------------------------------------------------
// Object metadata
// ---------------------------------------------------------------------------

/// Minimal object metadata subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    pub name: String,
    /// Namespace, absent for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl ObjectMeta {
    /// Metadata with just a name, no namespace.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Namespaced metadata.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            labels: HashMap::new(),
        }
    }

    /// The `namespace/name` identity for namespaced objects, or just the name
    /// for cluster-scoped ones.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Reference to another API object by kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Kind of the referenced object, e.g. `"VolumeSnapshot"`.
    pub kind: String,
    /// Name of the referenced object.
    pub name: String,
}

impl ObjectRef {
    /// Reference to a [`VolumeSnapshot`] by its `namespace/name` identity.
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            kind: "VolumeSnapshot".to_owned(),
            name: name.into(),
        }
    }

    /// Reference to a [`PersistentVolume`] by name.
    pub fn volume(name: impl Into<String>) -> Self {
        Self {
            kind: "PersistentVolume".to_owned(),
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Condition kinds reported on snapshot objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionKind {
    /// The snapshot (or its backing data) is fully realized.
    Ready,
}

/// Three-valued condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single status condition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// Condition kind.
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Condition status.
    pub status: ConditionStatus,
    /// Human-readable message.
    pub message: String,
    /// When the condition last changed.
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// A `Ready`/`True` condition stamped with the current time.
    pub fn ready(message: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::Ready,
            status: ConditionStatus::True,
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// VolumeSnapshot
// ---------------------------------------------------------------------------

/// Desired-state descriptor of a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Name of the claim whose bound volume should be snapshotted.
    pub persistent_volume_claim_name: String,
    /// Name of the backing [`VolumeSnapshotData`] object. Set either by an
    /// admin importing a pre-existing snapshot or by the engine once the
    /// snapshot is reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_data_name: Option<String>,
}

impl VolumeSnapshotSpec {
    /// The bound data object name, treating an empty string as unset.
    pub fn bound_data_name(&self) -> Option<&str> {
        self.snapshot_data_name.as_deref().filter(|n| !n.is_empty())
    }
}

/// Observed status of a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSnapshotStatus {
    /// Current condition set. The engine only ever replaces this wholesale
    /// with a single `Ready` condition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl VolumeSnapshotStatus {
    /// `true` when a `Ready`/`True` condition is present.
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == ConditionKind::Ready && c.status == ConditionStatus::True)
    }
}

/// A user-declared snapshot request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub metadata: ObjectMeta,
    pub spec: VolumeSnapshotSpec,
    #[serde(default)]
    pub status: VolumeSnapshotStatus,
}

// ---------------------------------------------------------------------------
// VolumeSnapshotData
// ---------------------------------------------------------------------------

/// Backend-specific location of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSnapshotDataSource {
    /// Snapshot archived on the host filesystem.
    #[serde(rename_all = "camelCase")]
    HostPath {
        /// Path of the snapshot archive.
        path: String,
    },
    /// EBS snapshot identified by the cloud provider.
    #[serde(rename_all = "camelCase")]
    AwsElasticBlockStore {
        /// Cloud-assigned snapshot identifier.
        snapshot_id: String,
    },
}

/// Spec of the backing artifact record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotDataSpec {
    /// Back-reference to the originating snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_ref: Option<ObjectRef>,
    /// Back-reference to the source volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_ref: Option<ObjectRef>,
    /// Where the backend stored the snapshot.
    pub source: VolumeSnapshotDataSource,
}

/// Observed status of a backing artifact record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeSnapshotDataStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Persisted record pairing a generated unique name with the backend artifact
/// produced by a snapshot create operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeSnapshotData {
    pub metadata: ObjectMeta,
    pub spec: VolumeSnapshotDataSpec,
    #[serde(default)]
    pub status: VolumeSnapshotDataStatus,
}

// ---------------------------------------------------------------------------
// Claim / volume lookup subset
// ---------------------------------------------------------------------------

/// Lifecycle phase of a claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

/// Claim spec subset: only the bound volume name matters here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    /// Name of the volume this claim is bound to, empty while unbound.
    #[serde(default)]
    pub volume_name: String,
}

/// Claim status subset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistentVolumeClaimStatus {
    #[serde(default)]
    pub phase: ClaimPhase,
}

/// A request for storage, possibly bound to a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeClaimSpec,
    #[serde(default)]
    pub status: PersistentVolumeClaimStatus,
}

/// Backend-specific location of a volume's data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersistentVolumeSource {
    /// Directory on the host filesystem.
    #[serde(rename_all = "camelCase")]
    HostPath {
        /// Directory holding the volume's data.
        path: String,
    },
    /// EBS volume identified by the cloud provider.
    #[serde(rename_all = "camelCase")]
    AwsElasticBlockStore {
        /// Cloud-assigned volume identifier.
        volume_id: String,
    },
}

impl PersistentVolumeSource {
    /// The volume-type tag used to select a plugin from the registry.
    pub fn volume_type(&self) -> &'static str {
        match self {
            Self::HostPath { .. } => "hostPath",
            Self::AwsElasticBlockStore { .. } => "awsElasticBlockStore",
        }
    }
}

/// Volume spec subset: the source determines the plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentVolumeSpec {
    #[serde(flatten)]
    pub source: PersistentVolumeSource,
}

/// A concrete storage resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentVolume {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeSpec,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_serde_roundtrip() {
        let snapshot = VolumeSnapshot {
            metadata: ObjectMeta::namespaced("default", "snap-1"),
            spec: VolumeSnapshotSpec {
                persistent_volume_claim_name: "pvc-1".into(),
                snapshot_data_name: None,
            },
            status: VolumeSnapshotStatus::default(),
        };
        let json = serde_json::to_string(&snapshot).expect("serialize");
        assert!(json.contains("\"persistentVolumeClaimName\":\"pvc-1\""));
        let de: VolumeSnapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(de.metadata.qualified_name(), "default/snap-1");
        assert_eq!(de.spec.persistent_volume_claim_name, "pvc-1");
        assert!(!de.status.is_ready());
    }

    #[test]
    fn snapshot_data_serde_roundtrip() {
        let data = VolumeSnapshotData {
            metadata: ObjectMeta::named("snapshot-data-1"),
            spec: VolumeSnapshotDataSpec {
                volume_snapshot_ref: Some(ObjectRef::snapshot("default/snap-1")),
                persistent_volume_ref: Some(ObjectRef::volume("pv-1")),
                source: VolumeSnapshotDataSource::HostPath {
                    path: "/var/snapshots/abc.tgz".into(),
                },
            },
            status: VolumeSnapshotDataStatus {
                conditions: vec![Condition::ready("snapshot created successfully")],
            },
        };
        let json = serde_json::to_string(&data).expect("serialize");
        assert!(json.contains("\"volumeSnapshotRef\""));
        assert!(json.contains("\"hostPath\""));
        let de: VolumeSnapshotData = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(de.spec.source, data.spec.source);
        assert_eq!(de.status.conditions.len(), 1);
    }

    #[test]
    fn volume_type_tags() {
        let hostpath = PersistentVolumeSource::HostPath {
            path: "/data".into(),
        };
        assert_eq!(hostpath.volume_type(), "hostPath");

        let ebs = PersistentVolumeSource::AwsElasticBlockStore {
            volume_id: "vol-1".into(),
        };
        assert_eq!(ebs.volume_type(), "awsElasticBlockStore");
    }

    #[test]
    fn volume_source_flattens_on_the_wire() {
        let volume = PersistentVolume {
            metadata: ObjectMeta::named("pv-1"),
            spec: PersistentVolumeSpec {
                source: PersistentVolumeSource::HostPath {
                    path: "/data".into(),
                },
            },
        };
        let json = serde_json::to_value(&volume).expect("serialize");
        assert!(json["spec"]["hostPath"]["path"].is_string());
    }

    #[test]
    fn bound_data_name_ignores_empty() {
        let mut spec = VolumeSnapshotSpec::default();
        assert!(spec.bound_data_name().is_none());
        spec.snapshot_data_name = Some(String::new());
        assert!(spec.bound_data_name().is_none());
        spec.snapshot_data_name = Some("snapshot-data-1".into());
        assert_eq!(spec.bound_data_name(), Some("snapshot-data-1"));
    }

    #[test]
    fn ready_condition() {
        let status = VolumeSnapshotStatus {
            conditions: vec![Condition::ready("ok")],
        };
        assert!(status.is_ready());
    }
}
