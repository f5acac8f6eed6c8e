//! Snapshot reconciler.
//!
//! A sync runs in a fixed order:
//!
//! 1. resolve the snapshot class of an unready snapshot, defaulting it for
//!    dynamic snapshots
//! 2. apply the finalizer plan, deleting the content when the plan says so
//! 3. release the source claim's finalizer if no unready snapshot needs it
//! 4. check a ready snapshot's binding, or drive an unready one towards
//!    ready: bind a pre-provisioned content, or find or create the dynamic
//!    content, then propagate its status
//!
//! Permanent failures are recorded on the snapshot status with a warning
//! event and returned as non-retryable errors.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use vsnap_core::constants::{
    ANN_DELETION_SECRET_REF_NAME, ANN_DELETION_SECRET_REF_NAMESPACE, CLAIM_FINALIZER,
};
use vsnap_core::{
    ApiError, ApiResultExt, DeletionPolicy, EventType, ObjectMeta, PersistentVolume,
    PersistentVolumeClaim, Resource, ResourceKind, SnapshotReference, StorageClass,
    VolumeSnapshot, VolumeSnapshotContent, VolumeSnapshotContentSource, VolumeSnapshotContentSpec,
    object_key,
};

use crate::binding::{self, BindDecision};
use crate::error::{Error, Result, is_controller_update_failure};
use crate::finalizer::{
    FinalizerInputs, FinalizerPlan, is_claim_being_used, is_volume_being_created_from_snapshot,
};
use crate::reasons::Reason;
use crate::reconciler::{Reconciler, mirror};
use crate::retry::with_retry;
use crate::secret::resolve_snapshotter_secret;
use crate::status;

impl Reconciler {
    /// Drive one snapshot towards its desired state.
    ///
    /// # Errors
    ///
    /// Returns a retryable error when a later sync may succeed (write
    /// conflicts, cache misses, API failures) and a permanent one when the
    /// snapshot cannot make progress as it stands (bind mismatch, missing
    /// class, invalid source).
    pub async fn sync_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        debug!(
            snapshot = %snapshot.key(),
            ready = snapshot.is_ready(),
            deleting = snapshot.metadata.is_being_deleted(),
            "syncing snapshot"
        );

        let snapshot = self.ensure_snapshot_class(snapshot.clone()).await?;

        let Some(snapshot) = self.process_finalizers(snapshot).await? else {
            return Ok(());
        };

        if let Err(e) = self.check_and_remove_claim_finalizer(&snapshot).await {
            warn!(snapshot = %snapshot.key(), error = %e, "failed to release source claim finalizer");
            self.recorder.record(
                &snapshot.reference(),
                EventType::Warning,
                Reason::PvcFinalizerError.as_str(),
                "Error check and remove PVC Finalizer for VolumeSnapshot",
            );
        }

        if snapshot.is_ready() {
            self.sync_ready_snapshot(&snapshot).await
        } else {
            self.sync_unready_snapshot(&snapshot).await
        }
    }

    // ------------------------------------------------------------------
    // Snapshot class
    // ------------------------------------------------------------------

    async fn ensure_snapshot_class(&self, snapshot: VolumeSnapshot) -> Result<VolumeSnapshot> {
        if snapshot.metadata.is_being_deleted() || snapshot.is_ready() {
            return Ok(snapshot);
        }

        if let Some(name) = snapshot.class_name() {
            if self.cache.classes.get_by_key(name)?.is_none() {
                let reason = format!("snapshot class '{name}' does not exist");
                self.record_error(
                    &snapshot,
                    Reason::GetClassFailed,
                    &format!("Failed to get snapshot class with error {reason}"),
                )
                .await;
                return Err(Error::validation(reason));
            }
            return Ok(snapshot);
        }

        if snapshot.is_pre_provisioned() {
            return Ok(snapshot);
        }

        match self.set_default_class(&snapshot).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.record_error(
                    &snapshot,
                    Reason::SetDefaultClassFailed,
                    &format!("Failed to set default snapshot class with error {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Pick the default class for the driver provisioning the source
    /// volume and write it into the snapshot spec.
    async fn set_default_class(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot> {
        let storage_class = self.source_storage_class(snapshot).await?;

        let defaults: Vec<_> = self
            .cache
            .classes
            .list()?
            .into_iter()
            .filter(|class| class.is_default() && class.driver == storage_class.provisioner)
            .collect();
        let class = match defaults.as_slice() {
            [class] => class,
            [] => return Err(Error::default_class("cannot find default snapshot class")),
            many => {
                return Err(Error::default_class(format!(
                    "{} default snapshot classes were found",
                    many.len()
                )));
            }
        };

        let mut next = snapshot.clone();
        next.spec.volume_snapshot_class_name = Some(class.name().to_string());
        let updated = self
            .client
            .update_snapshot(&next)
            .await
            .map_err(|e| Error::controller_update(snapshot.key(), e.to_string()))?;
        info!(snapshot = %snapshot.key(), class = %class.name(), "set default snapshot class");
        mirror(&self.cache.snapshots, updated.clone());
        Ok(updated)
    }

    async fn source_storage_class(&self, snapshot: &VolumeSnapshot) -> Result<StorageClass> {
        let claim = self.source_claim(snapshot)?;
        let from_claim = claim
            .spec
            .storage_class_name
            .clone()
            .filter(|name| !name.is_empty());

        let name = match from_claim {
            Some(name) => name,
            None => self
                .source_volume(snapshot)
                .await?
                .spec
                .storage_class_name
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    Error::default_class(
                        "cannot figure out the snapshot class automatically, please specify one in snapshot spec",
                    )
                })?,
        };

        Ok(self.client.get_storage_class(&name).await?)
    }

    // ------------------------------------------------------------------
    // Finalizers
    // ------------------------------------------------------------------

    /// Apply the finalizer plan. Returns `None` once the snapshot is gone.
    async fn process_finalizers(&self, snapshot: VolumeSnapshot) -> Result<Option<VolumeSnapshot>> {
        let content_name = snapshot
            .bound_content_name()
            .map_or_else(|| snapshot.derived_content_name(), str::to_string);
        let content = self.cache.contents.get_by_key(&content_name)?;
        let claims = self.cache.claims.list_namespace(snapshot.namespace())?;

        let inputs = FinalizerInputs {
            bound: content
                .as_deref()
                .is_some_and(|c| binding::is_snapshot_bound(&snapshot, c)),
            content_will_be_deleted: content
                .as_deref()
                .is_some_and(|c| c.spec.deletion_policy == DeletionPolicy::Delete),
            content_exists: content.is_some(),
            in_use: is_volume_being_created_from_snapshot(&snapshot, &claims),
        };
        let plan = FinalizerPlan::compute(&snapshot, &inputs);
        debug!(snapshot = %snapshot.key(), ?inputs, ?plan, "finalizer plan");

        if plan.delete_content {
            if let Some(content) = content
                .as_deref()
                .filter(|c| !c.metadata.is_being_deleted())
            {
                self.delete_content(&snapshot, content).await?;
            }
        }

        if !plan.changes_finalizers() {
            return Ok(Some(snapshot));
        }

        let mut next = snapshot.clone();
        next.metadata.finalizers = plan.apply(&snapshot.metadata.finalizers);
        let updated = self
            .client
            .update_snapshot(&next)
            .await
            .map_err(|e| Error::controller_update(snapshot.key(), e.to_string()))?;

        let released = updated.metadata.lifecycle().is_removable();
        mirror(&self.cache.snapshots, updated.clone());
        if released {
            info!(snapshot = %snapshot.key(), "released last finalizer, snapshot removed");
            return Ok(None);
        }
        debug!(snapshot = %snapshot.key(), finalizers = ?updated.metadata.finalizers, "updated finalizers");
        Ok(Some(updated))
    }

    async fn delete_content(
        &self,
        snapshot: &VolumeSnapshot,
        content: &VolumeSnapshotContent,
    ) -> Result<()> {
        if let Err(e) = self.client.delete_content(content.name()).await.optional() {
            warn!(snapshot = %snapshot.key(), content = %content.name(), error = %e, "failed to delete content");
            self.recorder.record(
                &snapshot.reference(),
                EventType::Warning,
                Reason::ContentDeleteError.as_str(),
                "Failed to delete snapshot content API object",
            );
            return Err(e.into());
        }
        info!(snapshot = %snapshot.key(), content = %content.name(), "requested content deletion");

        match self.client.get_content(content.name()).await.optional()? {
            Some(stored) => mirror(&self.cache.contents, stored),
            None => {
                self.cache.contents.delete(content.name())?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Source claim
    // ------------------------------------------------------------------

    fn source_claim(&self, snapshot: &VolumeSnapshot) -> Result<Arc<PersistentVolumeClaim>> {
        let Some(name) = snapshot.claim_name().filter(|name| !name.is_empty()) else {
            return Err(Error::validation(format!(
                "the claim name is not specified in snapshot {}",
                snapshot.key()
            )));
        };
        let key = object_key(Some(snapshot.namespace()), name);
        self.cache
            .claims
            .get_by_key(&key)?
            .ok_or_else(|| ApiError::not_found(ResourceKind::Claim, key).into())
    }

    async fn source_volume(&self, snapshot: &VolumeSnapshot) -> Result<PersistentVolume> {
        let claim = self.source_claim(snapshot)?;
        let volume_name = match claim.spec.volume_name.as_deref() {
            Some(name) if claim.is_bound() && !name.is_empty() => name,
            _ => {
                return Err(Error::validation(format!(
                    "the claim {} is not yet bound to a volume, will not attempt to take a snapshot",
                    claim.name()
                )));
            }
        };
        Ok(self.client.get_volume(volume_name).await?)
    }

    /// Guard the source claim while a snapshot is taken from it.
    async fn ensure_claim_finalizer(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        if snapshot.is_pre_provisioned() {
            return Ok(());
        }

        let claim = self.source_claim(snapshot).map_err(|e| {
            debug!(snapshot = %snapshot.key(), error = %e, "cannot get claim from snapshot");
            Error::controller_update(snapshot.key(), "cannot get claim from snapshot")
        })?;
        if claim.metadata.is_being_deleted() {
            return Err(Error::controller_update(
                claim.key(),
                "cannot add finalizer on claim because it is being deleted",
            ));
        }
        if claim.metadata.has_finalizer(CLAIM_FINALIZER) {
            return Ok(());
        }

        let mut next = (*claim).clone();
        next.metadata = next.metadata.with_finalizer(CLAIM_FINALIZER);
        let updated = self
            .client
            .update_claim(&next)
            .await
            .map_err(|e| Error::controller_update(claim.key(), e.to_string()))?;
        info!(snapshot = %snapshot.key(), claim = %claim.key(), "added source claim finalizer");
        mirror(&self.cache.claims, updated);
        Ok(())
    }

    /// Release the source claim once no unready snapshot is taken from it.
    async fn check_and_remove_claim_finalizer(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        if snapshot.is_pre_provisioned() {
            return Ok(());
        }
        let Ok(claim) = self.source_claim(snapshot) else {
            debug!(snapshot = %snapshot.key(), "source claim is gone, no finalizer to release");
            return Ok(());
        };
        if !claim.metadata.has_finalizer(CLAIM_FINALIZER) {
            return Ok(());
        }

        let snapshots = self.cache.snapshots.list_namespace(snapshot.namespace())?;
        if is_claim_being_used(&claim, &snapshots) {
            debug!(claim = %claim.key(), "claim is still a snapshot source");
            return Ok(());
        }

        let mut next = (*claim).clone();
        next.metadata = next.metadata.without_finalizer(CLAIM_FINALIZER);
        let updated = self
            .client
            .update_claim(&next)
            .await
            .map_err(|e| Error::controller_update(claim.key(), e.to_string()))?;
        info!(claim = %claim.key(), "released source claim finalizer");
        mirror(&self.cache.claims, updated);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Ready snapshots
    // ------------------------------------------------------------------

    async fn sync_ready_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        let Some(content_name) = snapshot.bound_content_name() else {
            return Ok(());
        };

        match self.cache.contents.get_by_key(content_name)? {
            None => {
                self.update_error_status_with_event(
                    snapshot,
                    Reason::ContentMissing,
                    "VolumeSnapshotContent is missing",
                )
                .await
            }
            Some(content) if !binding::is_snapshot_ref_set(snapshot, &content) => {
                self.update_error_status_with_event(
                    snapshot,
                    Reason::Misbound,
                    "VolumeSnapshotContent is not bound to the VolumeSnapshot correctly",
                )
                .await
            }
            Some(_) => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Unready snapshots
    // ------------------------------------------------------------------

    async fn sync_unready_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        if snapshot.is_pre_provisioned() {
            self.sync_pre_provisioned(snapshot).await
        } else {
            self.sync_dynamic(snapshot).await
        }
    }

    async fn sync_pre_provisioned(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        let content = self.find_content_from_store(snapshot).await?;

        let content = match binding::check_bind(snapshot, &content) {
            Ok(BindDecision::AlreadyBound) => content,
            Ok(BindDecision::Stamp(stamped)) => {
                let updated = self.client.update_content(&stamped).await?;
                info!(
                    snapshot = %snapshot.key(),
                    content = %updated.name(),
                    "bound pre-provisioned content"
                );
                mirror(&self.cache.contents, updated.clone());
                Arc::new(updated)
            }
            Err(e) => {
                error!(snapshot = %snapshot.key(), content = %content.name(), error = %e, "bind failed");
                self.record_error(
                    snapshot,
                    Reason::BindFailed,
                    &format!("Snapshot failed to bind VolumeSnapshotContent, {e}"),
                )
                .await;
                return Err(e);
            }
        };

        self.update_status_with_retry(snapshot, &content).await.map(|_| ())
    }

    async fn find_content_from_store(
        &self,
        snapshot: &VolumeSnapshot,
    ) -> Result<Arc<VolumeSnapshotContent>> {
        let name = snapshot
            .source_content_name()
            .or_else(|| snapshot.bound_content_name())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                Error::validation(format!("content name not found for snapshot {}", snapshot.key()))
            })?;

        if let Some(content) = self.cache.contents.get_by_key(name)? {
            return Ok(content);
        }

        debug!(snapshot = %snapshot.key(), content = %name, "requested content not found, will try again");
        self.record_error(snapshot, Reason::ContentMissing, "VolumeSnapshotContent is missing")
            .await;
        Err(Error::content_missing(name))
    }

    async fn sync_dynamic(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        let key = snapshot.key();
        let contents = self.cache.contents.list()?;

        if let Some(content) = binding::find_match(snapshot, &contents) {
            if content.has_snapshot_handle() {
                self.record_error(
                    snapshot,
                    Reason::HandleNotFound,
                    &format!("Snapshot handle not found in content {}", content.name()),
                )
                .await;
                return Err(Error::validation(format!(
                    "snapshotHandle should not be set in the content for dynamic provisioning for snapshot {key}"
                )));
            }
            return self.update_status_with_retry(snapshot, &content).await.map(|_| ());
        }

        if let Some(bound) = snapshot.bound_content_name() {
            if self.cache.contents.get_by_key(bound)?.is_some() {
                return Ok(());
            }
            if snapshot.metadata.is_being_deleted() {
                debug!(snapshot = %key, content = %bound, "content already gone during deletion");
                return Ok(());
            }
            self.record_error(
                snapshot,
                Reason::ContentNotFound,
                &format!("Content for snapshot {key} not found, but deletion timestamp not set on snapshot"),
            )
            .await;
            return Err(Error::content_missing(bound));
        }

        if !snapshot.error_message().is_none_or(is_controller_update_failure) {
            debug!(snapshot = %key, "snapshot carries a permanent error, not creating content");
            return Ok(());
        }
        if snapshot.metadata.is_being_deleted() {
            debug!(snapshot = %key, "snapshot is being deleted, not creating content");
            return Ok(());
        }
        if snapshot.claim_name().is_none_or(str::is_empty) {
            self.record_error(
                snapshot,
                Reason::PvcSourceMissing,
                &format!("PVC source for snapshot {key} is missing"),
            )
            .await;
            return Err(Error::validation(format!("expected claim source for snapshot {key}")));
        }

        let content = match self.create_content(snapshot).await {
            Ok(content) => content,
            Err(e) => {
                self.record_error(
                    snapshot,
                    Reason::ContentCreationFailed,
                    &format!("Failed to create snapshot content with error {e}"),
                )
                .await;
                return Err(e);
            }
        };

        self.update_status_with_retry(snapshot, &content).await.map(|_| ())
    }

    // ------------------------------------------------------------------
    // Content creation
    // ------------------------------------------------------------------

    async fn create_content(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshotContent> {
        self.ensure_claim_finalizer(snapshot).await?;

        let content = self.build_content(snapshot).await?;
        let name = content.name().to_string();
        info!(snapshot = %snapshot.key(), content = %name, "creating content");

        let client = &self.client;
        let proposed = &content;
        let outcome = with_retry(&self.config.retry, "create content", |_| async move {
            match client.create_content(proposed).await.tolerate_existing()? {
                Some(created) => Ok(created),
                None => {
                    debug!(content = %proposed.name(), "content already exists, reusing it");
                    client.get_content(proposed.name()).await
                }
            }
        })
        .await;

        match outcome.result {
            Ok(created) => {
                self.recorder.record(
                    &snapshot.reference(),
                    EventType::Normal,
                    Reason::ContentCreated.as_str(),
                    &format!("Created VolumeSnapshotContent {name}"),
                );
                mirror(&self.cache.contents, created.clone());
                Ok(created)
            }
            Err(e) => {
                let message = format!(
                    "Error creating volume snapshot content object for snapshot {}: {e}.",
                    snapshot.key()
                );
                error!(snapshot = %snapshot.key(), content = %name, attempts = outcome.attempts, error = %e, "content creation failed");
                self.recorder.record(
                    &snapshot.reference(),
                    EventType::Warning,
                    Reason::CreateContentFailed.as_str(),
                    &message,
                );
                Err(Error::controller_update(snapshot.key(), e.to_string()))
            }
        }
    }

    async fn build_content(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshotContent> {
        let class_name = snapshot.class_name().ok_or_else(|| {
            Error::validation(format!(
                "failed to take snapshot {} without a snapshot class",
                snapshot.key()
            ))
        })?;
        let class = self
            .cache
            .classes
            .get_by_key(class_name)?
            .ok_or_else(|| Error::validation(format!("snapshot class '{class_name}' does not exist")))?;

        let volume = self.source_volume(snapshot).await?;
        let csi = volume.spec.csi.as_ref().ok_or_else(|| {
            Error::validation(format!(
                "cannot find CSI source for volume {}",
                volume.metadata.name
            ))
        })?;

        let name = snapshot.derived_content_name();
        let secret = resolve_snapshotter_secret(&class.parameters, &name, snapshot)?;

        let mut metadata = ObjectMeta::cluster_scoped(name.as_str());
        if let Some(secret) = secret {
            metadata = metadata
                .with_annotation(ANN_DELETION_SECRET_REF_NAME, secret.name)
                .with_annotation(ANN_DELETION_SECRET_REF_NAMESPACE, secret.namespace);
        }

        Ok(VolumeSnapshotContent {
            metadata,
            spec: VolumeSnapshotContentSpec {
                volume_snapshot_ref: SnapshotReference {
                    namespace: snapshot.namespace().to_string(),
                    name: snapshot.name().to_string(),
                    uid: Some(snapshot.uid().clone()),
                },
                source: VolumeSnapshotContentSource::VolumeHandle(csi.volume_handle.clone()),
                volume_snapshot_class_name: Some(class.name().to_string()),
                deletion_policy: class.deletion_policy,
                driver: class.driver.clone(),
            },
            status: None,
        })
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Propagate `content`'s status into the snapshot, retrying per policy.
    ///
    /// On exhaustion the failure is recorded as `SnapshotStatusUpdateFailed`.
    async fn update_status_with_retry(
        &self,
        snapshot: &VolumeSnapshot,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshot> {
        let outcome = with_retry(&self.config.retry, "update snapshot status", |_| {
            self.update_snapshot_status(snapshot, content)
        })
        .await;

        match outcome.result {
            Ok(updated) => {
                if snapshot.bound_content_name().is_none() && updated.bound_content_name().is_some() {
                    info!(snapshot = %snapshot.key(), content = %content.name(), "snapshot bound");
                    self.recorder.record(
                        &updated.reference(),
                        EventType::Normal,
                        Reason::Bound.as_str(),
                        &format!("Bound to VolumeSnapshotContent {}", content.name()),
                    );
                }
                mirror(&self.cache.snapshots, updated.clone());
                Ok(updated)
            }
            Err(e) => {
                self.record_error(
                    snapshot,
                    Reason::StatusUpdateFailed,
                    &format!("Snapshot status update failed, {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    /// Re-read the snapshot and write the status implied by `content`.
    async fn update_snapshot_status(
        &self,
        snapshot: &VolumeSnapshot,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshot> {
        let current = self
            .client
            .get_snapshot(snapshot.namespace(), snapshot.name())
            .await?;

        let Some(next_status) = status::propagate(current.status.as_ref(), content) else {
            return Ok(current);
        };
        status::validate_transition(&current.key(), current.status.as_ref(), &next_status)?;

        let mut next = current.clone();
        next.status = Some(next_status);
        self.client
            .update_snapshot_status(&next)
            .await
            .map_err(|e| Error::controller_update(current.key(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vsnap_core::constants::{GIB, SNAPSHOT_AS_SOURCE_FINALIZER};
    use vsnap_core::{
        ApiClient, EventRecorder, InMemoryCluster, InMemoryEventRecorder, Uid, Verb,
        VolumeSnapshotClass,
    };

    use super::*;
    use crate::config::RetryPolicy;

    const DRIVER: &str = "csi.example.com";

    struct Fixture {
        cluster: Arc<InMemoryCluster>,
        recorder: Arc<InMemoryEventRecorder>,
        reconciler: Reconciler,
    }

    async fn fixture(classes: Vec<VolumeSnapshotClass>) -> Option<Fixture> {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster
            .seed(PersistentVolumeClaim::bound("default", "data", "pv-1").with_storage_class("fast"))
            .await
            .ok()?;
        cluster
            .seed(PersistentVolume::csi("pv-1", DRIVER, "vol-handle-1", 10 * GIB))
            .await
            .ok()?;
        cluster.seed(StorageClass::new("fast", DRIVER)).await.ok()?;
        for class in classes {
            cluster.seed(class).await.ok()?;
        }

        let recorder = InMemoryEventRecorder::new_arc();
        let reconciler = Reconciler::builder()
            .with_client(Arc::clone(&cluster) as Arc<dyn ApiClient>)
            .with_recorder(Arc::clone(&recorder) as Arc<dyn EventRecorder>)
            .retry(RetryPolicy::new(2, Duration::from_millis(1)))
            .build()
            .ok()?;
        Some(Fixture {
            cluster,
            recorder,
            reconciler,
        })
    }

    fn gold() -> VolumeSnapshotClass {
        VolumeSnapshotClass::new("gold", DRIVER, DeletionPolicy::Delete).as_default()
    }

    impl Fixture {
        async fn seed_snapshot(&self, snapshot: VolumeSnapshot) -> Option<VolumeSnapshot> {
            let stored = self.cluster.seed(snapshot).await.ok()?;
            self.refresh().await;
            Some(stored)
        }

        async fn refresh(&self) {
            self.cluster.sync_cache(self.reconciler.cache()).await.ok();
        }

        async fn stored_snapshot(&self) -> Option<VolumeSnapshot> {
            self.cluster.get::<VolumeSnapshot>("default/snap").await
        }
    }

    #[tokio::test]
    async fn test_default_class_is_filled_in() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_claim("default", "snap", "data"))
            .await
        else {
            return;
        };

        assert!(fx.reconciler.sync_snapshot(&snapshot).await.is_ok());
        let stored = fx.stored_snapshot().await;
        assert_eq!(stored.as_ref().and_then(VolumeSnapshot::class_name), Some("gold"));
    }

    #[tokio::test]
    async fn test_two_default_classes_fail_permanently() {
        let second = VolumeSnapshotClass::new("silver", DRIVER, DeletionPolicy::Retain).as_default();
        let Some(fx) = fixture(vec![gold(), second]).await else {
            return;
        };
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_claim("default", "snap", "data"))
            .await
        else {
            return;
        };

        let result = fx.reconciler.sync_snapshot(&snapshot).await;
        assert!(matches!(&result, Err(Error::DefaultClass { .. })));
        assert!(result.is_err_and(|e| !e.is_retryable()));
        assert_eq!(fx.recorder.with_reason("SetDefaultSnapshotClassFailed").len(), 1);
        let stored = fx.stored_snapshot().await;
        assert!(
            stored
                .as_ref()
                .and_then(VolumeSnapshot::error_message)
                .is_some_and(|m| m.contains("2 default snapshot classes were found"))
        );
    }

    #[tokio::test]
    async fn test_missing_named_class_is_reported() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_claim("default", "snap", "data").with_class("bronze"))
            .await
        else {
            return;
        };

        let result = fx.reconciler.sync_snapshot(&snapshot).await;
        assert!(matches!(result, Err(Error::Validation { .. })));
        assert_eq!(fx.recorder.with_reason("GetSnapshotClassFailed").len(), 1);
    }

    #[tokio::test]
    async fn test_dynamic_snapshot_creates_bound_content() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_claim("default", "snap", "data").with_class("gold"))
            .await
        else {
            return;
        };

        assert!(fx.reconciler.sync_snapshot(&snapshot).await.is_ok());

        let name = snapshot.derived_content_name();
        let content = fx.cluster.get::<VolumeSnapshotContent>(&name).await;
        assert!(content.is_some(), "content {name} was never created");
        assert_eq!(
            content.as_ref().and_then(VolumeSnapshotContent::bound_uid),
            Some(snapshot.uid())
        );
        assert_eq!(
            content.as_ref().map(|c| &c.spec.source),
            Some(&VolumeSnapshotContentSource::VolumeHandle("vol-handle-1".into()))
        );
        assert_eq!(
            content.map(|c| c.spec.deletion_policy),
            Some(DeletionPolicy::Delete)
        );

        let stored = fx.stored_snapshot().await;
        assert_eq!(
            stored.as_ref().and_then(VolumeSnapshot::bound_content_name),
            Some(name.as_str())
        );
        assert!(stored.is_some_and(|s| s.metadata.has_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER)));

        let claim = fx.cluster.get::<PersistentVolumeClaim>("default/data").await;
        assert!(claim.is_some_and(|c| c.metadata.has_finalizer(CLAIM_FINALIZER)));
        assert_eq!(fx.recorder.with_reason("SnapshotContentCreated").len(), 1);
        assert_eq!(fx.recorder.with_reason("SnapshotBound").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried_on_next_sync() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_claim("default", "snap", "data").with_class("gold"))
            .await
        else {
            return;
        };
        fx.cluster.fail_next(
            Verb::Create,
            ResourceKind::Content,
            2,
            ApiError::Unavailable("api server down".into()),
        );

        let result = fx.reconciler.sync_snapshot(&snapshot).await;
        assert!(result.is_err_and(|e| e.is_retryable()));
        assert_eq!(fx.recorder.with_reason("CreateSnapshotContentFailed").len(), 1);
        assert_eq!(fx.recorder.with_reason("SnapshotContentCreationFailed").len(), 1);

        let failed = fx.stored_snapshot().await;
        assert!(
            failed
                .as_ref()
                .and_then(VolumeSnapshot::error_message)
                .is_some_and(is_controller_update_failure)
        );

        let retried = match failed {
            Some(failed) => fx.reconciler.sync_snapshot(&failed).await,
            None => Err(Error::validation("snapshot vanished after failed creation")),
        };
        assert!(retried.is_ok(), "retry failed: {retried:?}");
        let created = fx
            .cluster
            .get::<VolumeSnapshotContent>(&snapshot.derived_content_name())
            .await;
        assert!(created.is_some());
    }

    #[tokio::test]
    async fn test_content_reserved_for_other_snapshot_fails_bind() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let mut content = VolumeSnapshotContent::pre_provisioned(
            "content-x",
            "default",
            "other",
            "snap-handle",
            DRIVER,
            DeletionPolicy::Retain,
        );
        content.spec.volume_snapshot_ref.uid = None;
        if fx.cluster.seed(content).await.is_err() {
            return;
        }
        let Some(snapshot) = fx
            .seed_snapshot(VolumeSnapshot::from_content("default", "snap", "content-x"))
            .await
        else {
            return;
        };

        let result = fx.reconciler.sync_snapshot(&snapshot).await;
        assert!(matches!(&result, Err(Error::BindFailed { .. })));
        assert!(result.is_err_and(|e| !e.is_retryable()));
        assert_eq!(fx.recorder.with_reason("SnapshotBindFailed").len(), 1);
    }

    #[tokio::test]
    async fn test_pre_provisioned_content_is_stamped_with_uid() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let mut content = VolumeSnapshotContent::pre_provisioned(
            "content-x",
            "default",
            "snap",
            "snap-handle",
            DRIVER,
            DeletionPolicy::Retain,
        );
        content.spec.volume_snapshot_ref.uid = None;
        if fx.cluster.seed(content).await.is_err() {
            return;
        }
        let mut snapshot = VolumeSnapshot::from_content("default", "snap", "content-x");
        snapshot.metadata.uid = Uid::new("snap-uid");
        let Some(snapshot) = fx.seed_snapshot(snapshot).await else {
            return;
        };

        assert!(fx.reconciler.sync_snapshot(&snapshot).await.is_ok());
        let stamped = fx.cluster.get::<VolumeSnapshotContent>("content-x").await;
        assert!(stamped.is_some_and(|c| c.bound_uid() == Some(&Uid::new("snap-uid"))));
        let stored = fx.stored_snapshot().await;
        assert_eq!(
            stored.as_ref().and_then(VolumeSnapshot::bound_content_name),
            Some("content-x")
        );
    }

    #[tokio::test]
    async fn test_ready_snapshot_with_missing_content_is_flagged() {
        let Some(fx) = fixture(vec![gold()]).await else {
            return;
        };
        let mut snapshot = VolumeSnapshot::from_content("default", "snap", "content-x");
        snapshot.metadata = snapshot.metadata.with_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER);
        snapshot.status = Some(vsnap_core::VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some("content-x".into()),
            ready_to_use: Some(true),
            ..vsnap_core::VolumeSnapshotStatus::default()
        });
        let Some(snapshot) = fx.seed_snapshot(snapshot).await else {
            return;
        };

        assert!(fx.reconciler.sync_snapshot(&snapshot).await.is_ok());
        assert_eq!(fx.recorder.with_reason("SnapshotContentMissing").len(), 1);
        let stored = fx.stored_snapshot().await;
        assert_eq!(
            stored.as_ref().and_then(VolumeSnapshot::error_message),
            Some("VolumeSnapshotContent is missing")
        );
        assert_eq!(stored.and_then(|s| s.status).and_then(|s| s.ready_to_use), Some(false));
    }
}
