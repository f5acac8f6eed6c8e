//! Shared building blocks for the volume snapshot controller.
//!
//! This crate holds everything the reconcilers talk to but do not own:
//!
//! - **Records**: `VolumeSnapshot`, `VolumeSnapshotContent` and the claim,
//!   volume and class records read while creating content
//! - **API client**: the async boundary every write goes through
//! - **Object cache**: typed, eventually consistent local mirror used for reads
//! - **Event recorder**: append-only audit trail attached to records
//! - **In-memory cluster**: an `ApiClient` with optimistic concurrency and
//!   two-phase delete, for tests and demos
//!
//! # Example
//!
//! ```ignore
//! use vsnap_core::{InMemoryCluster, ObjectCache, VolumeSnapshot};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cluster = InMemoryCluster::new();
//!     cluster
//!         .seed(VolumeSnapshot::from_claim("default", "nightly", "data"))
//!         .await
//!         .ok();
//!
//!     let cache = ObjectCache::new();
//!     cluster.sync_cache(&cache).await.ok();
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod cache;
pub mod client;
pub mod constants;
pub mod error;
pub mod events;
pub mod memory;
pub mod meta;
pub mod result;
pub mod types;

pub use cache::{ObjectCache, Store};
pub use client::ApiClient;
pub use error::{ApiError, ApiResult, CacheError};
pub use events::{EventRecorder, EventType, InMemoryEventRecorder, RecordedEvent, TracingEventRecorder};
pub use memory::{HasCollection, InMemoryCluster, JournalEntry, Verb};
pub use meta::{Lifecycle, ObjectMeta, ObjectReference, Resource, ResourceKind, Uid, object_key};
pub use result::{ApiResultExt, ResultExt};
pub use types::{
    ClaimPhase, CsiVolumeSource, DeletionPolicy, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeSpec, SnapshotReference,
    StorageClass, TypedLocalObjectReference, VolumeSnapshot, VolumeSnapshotClass,
    VolumeSnapshotContent, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
    VolumeSnapshotContentStatus, VolumeSnapshotError, VolumeSnapshotSource, VolumeSnapshotSpec,
    VolumeSnapshotStatus,
};
