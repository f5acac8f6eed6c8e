//! Finalizer management.
//!
//! Pure decisions about which delete guards a snapshot, a content or a
//! source claim must carry. Nothing here talks to the API; the reconcilers
//! apply the resulting plans.

use std::sync::Arc;

use vsnap_core::constants::{
    CONTENT_FINALIZER, SNAPSHOT_AS_SOURCE_FINALIZER, SNAPSHOT_BOUND_FINALIZER,
};
use vsnap_core::{PersistentVolumeClaim, VolumeSnapshot, VolumeSnapshotContent};

/// Facts about a snapshot's surroundings the plan depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizerInputs {
    /// Snapshot and content point at each other.
    pub bound: bool,
    /// The content's deletion policy is `Delete`.
    pub content_will_be_deleted: bool,
    /// The content still exists.
    pub content_exists: bool,
    /// A volume is being restored from the snapshot.
    pub in_use: bool,
}

/// What to do with a snapshot's guards and its content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizerPlan {
    pub add_as_source: bool,
    pub add_bound: bool,
    pub remove_as_source: bool,
    pub remove_bound: bool,
    pub delete_content: bool,
}

impl FinalizerPlan {
    /// Decide the plan for `snapshot`.
    #[must_use]
    pub fn compute(snapshot: &VolumeSnapshot, inputs: &FinalizerInputs) -> Self {
        let meta = &snapshot.metadata;
        let deleting = meta.is_being_deleted();

        let mut plan = Self {
            add_as_source: !deleting && !meta.has_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER),
            add_bound: !deleting
                && inputs.bound
                && inputs.content_will_be_deleted
                && snapshot.bound_content_name().is_some()
                && !meta.has_finalizer(SNAPSHOT_BOUND_FINALIZER),
            ..Self::default()
        };

        if is_finalizer_processing_candidate(snapshot) {
            plan.delete_content =
                inputs.content_exists && inputs.content_will_be_deleted && !inputs.in_use;
            plan.remove_as_source =
                !inputs.in_use && meta.has_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER);
            plan.remove_bound =
                !inputs.content_exists && meta.has_finalizer(SNAPSHOT_BOUND_FINALIZER);
        }

        plan
    }

    /// Whether applying the plan changes the finalizer list.
    #[must_use]
    pub const fn changes_finalizers(&self) -> bool {
        self.add_as_source || self.add_bound || self.remove_as_source || self.remove_bound
    }

    /// The finalizer list after applying the plan to `current`.
    #[must_use]
    pub fn apply(&self, current: &[String]) -> Vec<String> {
        let mut finalizers: Vec<String> = current
            .iter()
            .filter(|f| {
                !((self.remove_as_source && *f == SNAPSHOT_AS_SOURCE_FINALIZER)
                    || (self.remove_bound && *f == SNAPSHOT_BOUND_FINALIZER))
            })
            .cloned()
            .collect();

        for (wanted, name) in [
            (self.add_as_source, SNAPSHOT_AS_SOURCE_FINALIZER),
            (self.add_bound, SNAPSHOT_BOUND_FINALIZER),
        ] {
            if wanted && !finalizers.iter().any(|f| f == name) {
                finalizers.push(name.to_string());
            }
        }
        finalizers
    }
}

/// A content that is not being deleted must carry its guard.
#[must_use]
pub fn needs_content_finalizer(content: &VolumeSnapshotContent) -> bool {
    !content.metadata.is_being_deleted() && !content.metadata.has_finalizer(CONTENT_FINALIZER)
}

/// Deletion was requested and one of our guards is still on the snapshot.
#[must_use]
pub fn is_finalizer_processing_candidate(snapshot: &VolumeSnapshot) -> bool {
    let meta = &snapshot.metadata;
    meta.is_being_deleted()
        && (meta.has_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER)
            || meta.has_finalizer(SNAPSHOT_BOUND_FINALIZER))
}

/// Deletion was requested and nothing restores from the snapshot any more,
/// so its content may be torn down.
#[must_use]
pub fn is_teardown_candidate(snapshot: &VolumeSnapshot) -> bool {
    snapshot.metadata.is_being_deleted()
        && !snapshot.metadata.has_finalizer(SNAPSHOT_AS_SOURCE_FINALIZER)
}

/// Some pending claim in the snapshot's namespace restores from it.
#[must_use]
pub fn is_volume_being_created_from_snapshot(
    snapshot: &VolumeSnapshot,
    claims: &[Arc<PersistentVolumeClaim>],
) -> bool {
    claims.iter().any(|claim| {
        claim.metadata.namespace_or_default() == snapshot.namespace()
            && claim.is_pending()
            && claim.restores_from(snapshot.name())
    })
}

/// Some unready snapshot in the claim's namespace is still taken from it.
#[must_use]
pub fn is_claim_being_used(
    claim: &PersistentVolumeClaim,
    snapshots: &[Arc<VolumeSnapshot>],
) -> bool {
    snapshots.iter().any(|snap| {
        snap.namespace() == claim.metadata.namespace_or_default()
            && snap.claim_name() == Some(claim.name())
            && !snap.is_ready()
    })
}
