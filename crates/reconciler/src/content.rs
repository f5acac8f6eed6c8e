//! Content reconciler.

use tracing::{debug, info};
use vsnap_core::constants::{ANN_SNAPSHOT_BEING_DELETED, CONTENT_FINALIZER};
use vsnap_core::{DeletionPolicy, VolumeSnapshotContent};

use crate::error::{Error, Result};
use crate::finalizer::{is_teardown_candidate, needs_content_finalizer};
use crate::reconciler::{Reconciler, mirror};

impl Reconciler {
    /// Drive one content towards its desired state.
    ///
    /// Adds the content's finalizer, asks for a snapshot sync once the
    /// content is ready, and flags the content for teardown when its
    /// snapshot is gone or being deleted.
    ///
    /// # Errors
    ///
    /// Returns `ControllerUpdate` if a write fails, or a cache error.
    pub async fn sync_content(&self, content: &VolumeSnapshotContent) -> Result<()> {
        let snapshot_key = content.spec.volume_snapshot_ref.key();
        debug!(content = %content.name(), snapshot = %snapshot_key, "syncing content");

        if needs_content_finalizer(content) {
            let mut next = content.clone();
            next.metadata = next.metadata.with_finalizer(CONTENT_FINALIZER);
            let updated = self
                .client
                .update_content(&next)
                .await
                .map_err(|e| Error::controller_update(content.name(), e.to_string()))?;
            debug!(content = %content.name(), "added content finalizer");
            mirror(&self.cache.contents, updated);
            return Ok(());
        }

        let Some(bound_uid) = content.bound_uid() else {
            debug!(
                content = %content.name(),
                snapshot = %snapshot_key,
                "content is reserved but not bound yet"
            );
            return Ok(());
        };

        let snapshot = self
            .cache
            .snapshots
            .get_by_key(&snapshot_key)?
            .filter(|snapshot| {
                let same = snapshot.uid() == bound_uid;
                if !same {
                    debug!(
                        content = %content.name(),
                        snapshot = %snapshot_key,
                        "snapshot was replaced, treating it as gone"
                    );
                }
                same
            });

        if snapshot.is_some() && content.is_ready() {
            self.snapshot_queue.add(snapshot_key.as_str()).await;
        }

        let orphaned = snapshot.as_deref().is_none_or(is_teardown_candidate);
        if orphaned
            && content.spec.deletion_policy == DeletionPolicy::Delete
            && !content.metadata.has_annotation(ANN_SNAPSHOT_BEING_DELETED)
        {
            let mut next = content.clone();
            next.metadata = next.metadata.with_annotation(ANN_SNAPSHOT_BEING_DELETED, "yes");
            let updated = self
                .client
                .update_content(&next)
                .await
                .map_err(|e| Error::controller_update(content.name(), e.to_string()))?;
            info!(
                content = %content.name(),
                snapshot = %snapshot_key,
                "marked content for teardown"
            );
            mirror(&self.cache.contents, updated);
        }

        Ok(())
    }
}
