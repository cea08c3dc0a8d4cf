//! # libsnapshot — volume snapshot reconciliation engine
//!
//! `libsnapshot` implements the core of a declarative snapshot controller:
//! users declare a desired [`api::VolumeSnapshot`], and the
//! [`snapshotter::VolumeSnapshotter`] drives the world toward that state by
//! invoking pluggable storage backends, recording the resulting
//! [`api::VolumeSnapshotData`] artifact, and updating status. It follows the
//! RK8s architecture conventions (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`api`] | Object model: snapshots, snapshot data, claim/volume subset. |
//! | [`error`] | [`SnapshotError`] enum covering all failure modes. |
//! | [`opmap`] | [`OperationMap`] keyed executor with backoff dedup. |
//! | [`cache`] | [`ActualStateOfWorld`] in-memory realized-snapshot index. |
//! | [`volume`] | [`VolumePlugin`] backend contract and hostpath plugin. |
//! | [`store`] | Control-plane store boundary traits and memory store. |
//! | [`snapshotter`] | [`VolumeSnapshotter`] reconciliation engine. |
//! | [`bootstrap`] | Startup polling for resource/snapshot readiness. |

pub mod api;
pub mod bootstrap;
pub mod cache;
pub mod error;
pub mod opmap;
pub mod snapshotter;
pub mod store;
pub mod volume;

// Re-export the most commonly used items at crate root for convenience.
pub use cache::ActualStateOfWorld;
pub use error::SnapshotError;
pub use opmap::{OperationKey, OperationKind, OperationMap, ScheduleError};
pub use snapshotter::VolumeSnapshotter;
pub use store::{CoreClient, MemoryStore, SnapshotStore, StoreError};
pub use volume::{HostPathPlugin, VolumePlugin, VolumePluginRegistry};
