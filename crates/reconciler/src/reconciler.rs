//! The reconciler and its builder.
//!
//! A [`Reconciler`] owns nothing but handles: the API client it writes
//! through, the cache it reads from, the recorder it reports to and the
//! two work queues the controller drains. The sync logic itself lives in
//! `content.rs` and `snapshot.rs`.

use std::sync::Arc;

use tracing::debug;
use vsnap_core::{
    ApiClient, EventRecorder, EventType, ObjectCache, Resource, ResultExt, Store,
    TracingEventRecorder, VolumeSnapshot,
};

use crate::config::{ReconcilerConfig, RetryPolicy};
use crate::error::{Error, Result};
use crate::queue::WorkQueue;
use crate::reasons::Reason;
use crate::status;

/// Keeps snapshots and their contents bound to each other.
pub struct Reconciler {
    pub(crate) client: Arc<dyn ApiClient>,
    pub(crate) cache: ObjectCache,
    pub(crate) recorder: Arc<dyn EventRecorder>,
    pub(crate) snapshot_queue: Arc<WorkQueue>,
    pub(crate) content_queue: Arc<WorkQueue>,
    pub(crate) config: ReconcilerConfig,
}

impl Reconciler {
    /// Start building a reconciler.
    #[must_use]
    pub fn builder() -> ReconcilerBuilder {
        ReconcilerBuilder::new()
    }

    #[must_use]
    pub fn client(&self) -> &Arc<dyn ApiClient> {
        &self.client
    }

    #[must_use]
    pub const fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Queue of snapshot keys (`namespace/name`).
    #[must_use]
    pub const fn snapshot_queue(&self) -> &Arc<WorkQueue> {
        &self.snapshot_queue
    }

    /// Queue of content keys (`name`).
    #[must_use]
    pub const fn content_queue(&self) -> &Arc<WorkQueue> {
        &self.content_queue
    }

    #[must_use]
    pub const fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Sync the cached snapshot stored under `key`.
    ///
    /// A key that is no longer cached belongs to a removed snapshot and
    /// needs no work.
    ///
    /// # Errors
    ///
    /// Returns the error of the sync; see [`Error::is_retryable`].
    pub async fn sync_snapshot_by_key(&self, key: &str) -> Result<()> {
        match self.cache.snapshots.get_by_key(key)? {
            Some(snapshot) => self.sync_snapshot(&snapshot).await,
            None => {
                debug!(snapshot = %key, "snapshot no longer cached, nothing to do");
                Ok(())
            }
        }
    }

    /// Sync the cached content stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns the error of the sync; see [`Error::is_retryable`].
    pub async fn sync_content_by_key(&self, name: &str) -> Result<()> {
        match self.cache.contents.get_by_key(name)? {
            Some(content) => self.sync_content(&content).await,
            None => {
                debug!(content = %name, "content no longer cached, nothing to do");
                Ok(())
            }
        }
    }

    /// Record `message` on the snapshot's status and emit a warning event.
    ///
    /// Nothing is written when the same message is already recorded. The
    /// event is emitted only after the status write succeeded.
    ///
    /// # Errors
    ///
    /// Returns the API error if the status write failed.
    pub async fn update_error_status_with_event(
        &self,
        snapshot: &VolumeSnapshot,
        reason: Reason,
        message: &str,
    ) -> Result<()> {
        let Some(next_status) = status::error_status(snapshot.status.as_ref(), message) else {
            debug!(snapshot = %snapshot.key(), reason = %reason, "error already recorded");
            return Ok(());
        };
        status::validate_transition(&snapshot.key(), snapshot.status.as_ref(), &next_status)?;

        let mut next = snapshot.clone();
        next.status = Some(next_status);
        let updated = self.client.update_snapshot_status(&next).await?;

        self.recorder
            .record(&updated.reference(), EventType::Warning, reason.as_str(), message);
        mirror(&self.cache.snapshots, updated);
        Ok(())
    }

    /// Like [`Self::update_error_status_with_event`], logging a failed write
    /// instead of returning it.
    pub(crate) async fn record_error(&self, snapshot: &VolumeSnapshot, reason: Reason, message: &str) {
        self.update_error_status_with_event(snapshot, reason, message)
            .await
            .into_option_logged("failed to record snapshot error status");
    }
}

/// Reflect a successful write into the cache.
///
/// A record the write released (deletion requested, no finalizers left) is
/// dropped from the cache. Cache failures are logged; the next resync
/// repairs them.
pub(crate) fn mirror<T: Resource>(store: &Store<T>, obj: T) {
    let key = obj.key();
    if obj.metadata().lifecycle().is_removable() {
        store
            .delete(&key)
            .into_option_logged("failed to drop released record from cache");
    } else {
        store
            .update(obj)
            .into_option_logged("failed to mirror write into cache");
    }
}

/// Builder for [`Reconciler`].
pub struct ReconcilerBuilder {
    client: Option<Arc<dyn ApiClient>>,
    cache: Option<ObjectCache>,
    recorder: Option<Arc<dyn EventRecorder>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            cache: None,
            recorder: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the API client.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ApiClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the object cache. Defaults to an empty cache.
    #[must_use]
    pub fn with_cache(mut self, cache: ObjectCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the event recorder. Defaults to [`TracingEventRecorder`].
    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the number of workers per queue.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if no client was given or the configuration
    /// is invalid.
    pub fn build(self) -> Result<Reconciler> {
        let client = self
            .client
            .ok_or_else(|| Error::invalid_config("API client is required"))?;
        self.config.validate()?;

        Ok(Reconciler {
            client,
            cache: self.cache.unwrap_or_default(),
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(TracingEventRecorder)),
            snapshot_queue: WorkQueue::new_arc("snapshots"),
            content_queue: WorkQueue::new_arc("contents"),
            config: self.config,
        })
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsnap_core::{InMemoryCluster, InMemoryEventRecorder, ResourceKind, Verb};

    fn build(cluster: &Arc<InMemoryCluster>, recorder: &Arc<InMemoryEventRecorder>) -> Result<Reconciler> {
        ReconcilerBuilder::new()
            .with_client(Arc::clone(cluster) as Arc<dyn ApiClient>)
            .with_recorder(Arc::clone(recorder) as Arc<dyn EventRecorder>)
            .build()
    }

    #[test]
    fn test_builder_requires_client() {
        let result = ReconcilerBuilder::new().build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let cluster = Arc::new(InMemoryCluster::new());
        let result = ReconcilerBuilder::new()
            .with_client(cluster as Arc<dyn ApiClient>)
            .workers(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_applies_settings() {
        let cluster = Arc::new(InMemoryCluster::new());
        let reconciler = ReconcilerBuilder::default()
            .with_client(cluster as Arc<dyn ApiClient>)
            .retry(RetryPolicy::once())
            .workers(2)
            .build();
        assert!(reconciler.is_ok_and(|r| r.config().workers == 2 && r.config().retry.attempts == 1));
    }

    #[tokio::test]
    async fn test_missing_keys_are_ignored() {
        let cluster = Arc::new(InMemoryCluster::new());
        let recorder = InMemoryEventRecorder::new_arc();
        let Ok(reconciler) = build(&cluster, &recorder) else {
            return;
        };
        assert!(reconciler.sync_snapshot_by_key("default/gone").await.is_ok());
        assert!(reconciler.sync_content_by_key("gone").await.is_ok());
        assert_eq!(cluster.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_error_status_written_once_with_event() {
        let cluster = Arc::new(InMemoryCluster::new());
        let recorder = InMemoryEventRecorder::new_arc();
        let Ok(reconciler) = build(&cluster, &recorder) else {
            return;
        };
        let Ok(snapshot) = cluster
            .seed(VolumeSnapshot::from_content("default", "snap", "content-x"))
            .await
        else {
            return;
        };

        let first = reconciler
            .update_error_status_with_event(&snapshot, Reason::ContentMissing, "VolumeSnapshotContent is missing")
            .await;
        assert!(first.is_ok());
        assert_eq!(recorder.with_reason("SnapshotContentMissing").len(), 1);

        let cached = reconciler
            .cache()
            .snapshots
            .get_by_key("default/snap")
            .ok()
            .flatten();
        assert_eq!(
            cached.as_deref().and_then(VolumeSnapshot::error_message),
            Some("VolumeSnapshotContent is missing")
        );

        let Some(cached) = cached else {
            return;
        };
        let second = reconciler
            .update_error_status_with_event(&cached, Reason::ContentMissing, "VolumeSnapshotContent is missing")
            .await;
        assert!(second.is_ok());
        assert_eq!(recorder.count(), 1);
        assert_eq!(cluster.journal_len(), 1);
    }

    #[tokio::test]
    async fn test_failed_error_status_emits_no_event() {
        let cluster = Arc::new(InMemoryCluster::new());
        let recorder = InMemoryEventRecorder::new_arc();
        let Ok(reconciler) = build(&cluster, &recorder) else {
            return;
        };
        let Ok(snapshot) = cluster
            .seed(VolumeSnapshot::from_content("default", "snap", "content-x"))
            .await
        else {
            return;
        };
        cluster.fail_next(
            Verb::UpdateStatus,
            ResourceKind::Snapshot,
            1,
            vsnap_core::ApiError::Unavailable("down".into()),
        );

        let result = reconciler
            .update_error_status_with_event(&snapshot, Reason::BindFailed, "boom")
            .await;
        assert!(result.is_err());
        assert_eq!(recorder.count(), 0);
    }
}
