//! Binding controller for volume snapshots.
//!
//! A `VolumeSnapshot` asks for a point-in-time copy of a volume; a
//! `VolumeSnapshotContent` records the copy on the storage side. This crate
//! keeps the two bound to each other:
//!
//! - **Binding**: a snapshot names its content in `status`, the content
//!   names the snapshot (UID included) in `spec.volumeSnapshotRef`
//! - **Provisioning**: a snapshot taken from a claim gets a content created
//!   for it; a snapshot naming an existing content binds to it
//! - **Status**: readiness, creation time and restore size flow from the
//!   content to the snapshot, one direction per field
//! - **Deletion**: finalizers keep both records (and the source claim)
//!   alive until nothing depends on them any more
//!
//! # Key Concepts
//!
//! ## Sync
//!
//! [`Reconciler::sync_snapshot`] and [`Reconciler::sync_content`] read from
//! the [`ObjectCache`](vsnap_core::ObjectCache), write through the
//! [`ApiClient`](vsnap_core::ApiClient), and mirror every successful write
//! back into the cache. Each returns an [`Error`] whose
//! [`Error::is_retryable`] decides whether the key is queued again.
//!
//! ## Controller
//!
//! [`Controller`] runs `workers` tasks per queue plus a periodic resync.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use vsnap_core::{ApiClient, InMemoryCluster, ObjectCache};
//! use vsnap_reconciler::{Controller, Reconciler, ReconcilerConfig};
//!
//! #[tokio::main]
//! async fn main() -> vsnap_reconciler::Result<()> {
//!     let cluster = Arc::new(InMemoryCluster::new());
//!     let cache = ObjectCache::new();
//!     cluster.sync_cache(&cache).await?;
//!
//!     let reconciler = Reconciler::builder()
//!         .with_client(cluster as Arc<dyn ApiClient>)
//!         .with_cache(cache)
//!         .with_config(ReconcilerConfig::default().from_env()?)
//!         .build()?;
//!
//!     let handle = Controller::new(Arc::new(reconciler)).start();
//!     // ...
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod binding;
pub mod config;
mod content;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod queue;
pub mod reasons;
pub mod reconciler;
pub mod retry;
pub mod secret;
mod snapshot;
pub mod status;

// Re-export main types
pub use binding::BindDecision;
pub use config::{ReconcilerConfig, RetryPolicy};
pub use controller::{Controller, ControllerHandle, ControllerStopper, enqueue_all};
pub use error::{CONTROLLER_UPDATE_FAIL_MSG, Error, Result, is_controller_update_failure};
pub use finalizer::{FinalizerInputs, FinalizerPlan};
pub use queue::WorkQueue;
pub use reasons::Reason;
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use retry::{RetryOutcome, with_retry};
pub use secret::SecretReference;
