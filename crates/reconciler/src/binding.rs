//! Binding resolution between a snapshot and its content.
//!
//! A content is matched to a snapshot by namespace, name and UID of its
//! back-reference. An empty UID means the binding has not been decided yet;
//! the resolver fills it in for pre-provisioned contents.

use std::sync::Arc;

use vsnap_core::{VolumeSnapshot, VolumeSnapshotContent};

use crate::error::{Error, Result};

/// Outcome of checking a pre-provisioned content against its snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindDecision {
    /// The content already carries the snapshot's UID, and its class if the
    /// snapshot names one.
    AlreadyBound,
    /// Write this content to record the binding.
    Stamp(VolumeSnapshotContent),
}

/// The content's back-reference names `snapshot`, UID included.
#[must_use]
pub fn is_snapshot_ref_set(snapshot: &VolumeSnapshot, content: &VolumeSnapshotContent) -> bool {
    let reference = &content.spec.volume_snapshot_ref;
    reference.name == snapshot.name()
        && reference.namespace == snapshot.namespace()
        && content.bound_uid() == Some(snapshot.uid())
}

/// Snapshot and content point at each other.
#[must_use]
pub fn is_snapshot_bound(snapshot: &VolumeSnapshot, content: &VolumeSnapshotContent) -> bool {
    is_snapshot_ref_set(snapshot, content) && snapshot.bound_content_name() == Some(content.name())
}

/// Find the content dynamically created for `snapshot`.
///
/// Namespace, name, UID and class name must all agree.
#[must_use]
pub fn find_match(
    snapshot: &VolumeSnapshot,
    contents: &[Arc<VolumeSnapshotContent>],
) -> Option<Arc<VolumeSnapshotContent>> {
    let class = snapshot.class_name()?;
    contents
        .iter()
        .find(|content| {
            is_snapshot_ref_set(snapshot, content)
                && content.spec.volume_snapshot_class_name.as_deref() == Some(class)
        })
        .cloned()
}

/// Check that `content` may be bound to `snapshot` and work out the write
/// that records the binding.
///
/// # Errors
///
/// Returns `BindFailed` if the content is reserved for another snapshot.
pub fn check_bind(
    snapshot: &VolumeSnapshot,
    content: &VolumeSnapshotContent,
) -> Result<BindDecision> {
    let reference = &content.spec.volume_snapshot_ref;
    if reference.name != snapshot.name() || reference.namespace != snapshot.namespace() {
        return Err(Error::bind_failed(
            snapshot.key(),
            content.name(),
            format!("content is reserved for {}", reference.key()),
        ));
    }

    match content.bound_uid() {
        Some(uid) if uid != snapshot.uid() => Err(Error::bind_failed(
            snapshot.key(),
            content.name(),
            format!("content is bound to UID {uid}, snapshot has {}", snapshot.uid()),
        )),
        Some(_)
            if content.spec.volume_snapshot_class_name.is_some()
                || snapshot.class_name().is_none() =>
        {
            Ok(BindDecision::AlreadyBound)
        }
        _ => {
            let mut stamped = content.clone();
            stamped.spec.volume_snapshot_ref.uid = Some(snapshot.uid().clone());
            if let Some(class) = snapshot.class_name() {
                stamped.spec.volume_snapshot_class_name = Some(class.to_string());
            }
            Ok(BindDecision::Stamp(stamped))
        }
    }
}
