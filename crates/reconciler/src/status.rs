//! Status propagation from content to snapshot.
//!
//! Every field moves in one direction only: the bound content name and the
//! creation time are set once, the restore size only grows from unknown or
//! zero, and `readyToUse = true` clears any recorded error.

use vsnap_core::{VolumeSnapshotContent, VolumeSnapshotError, VolumeSnapshotStatus};

use crate::error::{Error, Result};

/// Work out the snapshot status implied by `content`.
///
/// Returns `None` when `current` already reflects the content.
#[must_use]
pub fn propagate(
    current: Option<&VolumeSnapshotStatus>,
    content: &VolumeSnapshotContent,
) -> Option<VolumeSnapshotStatus> {
    let content_status = content.status.as_ref();
    let created = content_status.and_then(|s| s.creation_time);
    let size = content_status.and_then(|s| s.restore_size);
    let ready = content.is_ready();

    let Some(current) = current else {
        return Some(VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some(content.name().to_string()),
            creation_time: created,
            ready_to_use: Some(ready),
            restore_size: size,
            error: None,
        });
    };

    let mut next = current.clone();
    if next.bound_volume_snapshot_content_name.is_none() {
        next.bound_volume_snapshot_content_name = Some(content.name().to_string());
    }
    if next.creation_time.is_none() && created.is_some() {
        next.creation_time = created;
    }
    if next.ready_to_use != Some(ready) {
        next.ready_to_use = Some(ready);
    }
    if ready {
        next.error = None;
    }
    match (next.restore_size, size) {
        (None, Some(reported)) => next.restore_size = Some(reported),
        (Some(0), Some(reported)) if reported > 0 => next.restore_size = Some(reported),
        _ => {}
    }

    (next != *current).then_some(next)
}

/// Status recording `message` as the snapshot's error.
///
/// Returns `None` when the same message is already recorded.
#[must_use]
pub fn error_status(
    current: Option<&VolumeSnapshotStatus>,
    message: &str,
) -> Option<VolumeSnapshotStatus> {
    let recorded = current
        .and_then(|s| s.error.as_ref())
        .is_some_and(|e| e.message == message);
    if recorded {
        return None;
    }

    let mut next = current.cloned().unwrap_or_default();
    next.error = Some(VolumeSnapshotError::now(message));
    next.ready_to_use = Some(false);
    Some(next)
}

/// Reject a status write that would move a field backwards.
///
/// # Errors
///
/// Returns `IllegalStatusTransition` if the bound name is cleared or
/// changed, the creation time changes, a known non-zero size shrinks, or an
/// error is kept alongside `readyToUse = true`.
pub fn validate_transition(
    snapshot: &str,
    old: Option<&VolumeSnapshotStatus>,
    new: &VolumeSnapshotStatus,
) -> Result<()> {
    if new.ready_to_use == Some(true) && new.error.is_some() {
        return Err(Error::illegal_transition(
            snapshot,
            "readyToUse is true while an error is recorded",
        ));
    }

    let Some(old) = old else {
        return Ok(());
    };

    if let Some(bound) = &old.bound_volume_snapshot_content_name {
        if new.bound_volume_snapshot_content_name.as_ref() != Some(bound) {
            return Err(Error::illegal_transition(
                snapshot,
                format!(
                    "bound content name would change from '{bound}' to {:?}",
                    new.bound_volume_snapshot_content_name
                ),
            ));
        }
    }

    if old.creation_time.is_some() && new.creation_time != old.creation_time {
        return Err(Error::illegal_transition(
            snapshot,
            "creation time would change",
        ));
    }

    if let Some(size) = old.restore_size.filter(|s| *s > 0) {
        if new.restore_size.is_none_or(|n| n < size) {
            return Err(Error::illegal_transition(
                snapshot,
                format!("restore size would shrink from {size}"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use vsnap_core::constants::GIB;
    use vsnap_core::{DeletionPolicy, VolumeSnapshotContentStatus};

    fn content(ready: Option<bool>, size: Option<u64>) -> VolumeSnapshotContent {
        VolumeSnapshotContent::pre_provisioned(
            "snapcontent-1",
            "default",
            "snap",
            "handle",
            "csi.example.com",
            DeletionPolicy::Delete,
        )
        .with_status(VolumeSnapshotContentStatus {
            ready_to_use: ready,
            restore_size: size,
            creation_time: Some(Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_default()),
            ..VolumeSnapshotContentStatus::default()
        })
    }

    #[test]
    fn test_first_propagation_binds() {
        let next = propagate(None, &content(None, None));
        assert_eq!(
            next.as_ref()
                .and_then(|s| s.bound_volume_snapshot_content_name.as_deref()),
            Some("snapcontent-1")
        );
        assert_eq!(next.as_ref().and_then(|s| s.ready_to_use), Some(false));
        assert!(next.as_ref().is_some_and(|s| s.creation_time.is_some()));
    }

    #[test]
    fn test_no_change_means_no_write() {
        let c = content(Some(true), Some(10 * GIB));
        let first = propagate(None, &c);
        assert!(first.is_some());
        assert_eq!(propagate(first.as_ref(), &c), None);
    }

    #[test]
    fn test_ready_clears_error() {
        let errored = error_status(None, "boom");
        let next = propagate(errored.as_ref(), &content(Some(true), None));
        assert!(next.as_ref().is_some_and(|s| s.error.is_none()));
        assert_eq!(next.and_then(|s| s.ready_to_use), Some(true));
    }

    #[test]
    fn test_zero_size_is_replaced_but_nonzero_is_kept() {
        let zero = VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some("snapcontent-1".into()),
            restore_size: Some(0),
            ready_to_use: Some(true),
            ..VolumeSnapshotStatus::default()
        };
        let next = propagate(Some(&zero), &content(Some(true), Some(GIB)));
        assert_eq!(next.as_ref().and_then(|s| s.restore_size), Some(GIB));

        let known = VolumeSnapshotStatus {
            restore_size: Some(GIB),
            ..zero
        };
        let next = propagate(Some(&known), &content(Some(true), Some(2 * GIB)));
        assert_eq!(next.and_then(|s| s.restore_size), Some(GIB));
    }

    #[test]
    fn test_bound_name_is_never_replaced() {
        let status = VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some("other".into()),
            ..VolumeSnapshotStatus::default()
        };
        let next = propagate(Some(&status), &content(Some(false), None));
        assert_eq!(
            next.and_then(|s| s.bound_volume_snapshot_content_name),
            Some("other".to_string())
        );
    }

    #[test]
    fn test_error_status_is_noop_for_same_message() {
        let first = error_status(None, "content missing");
        assert!(first.is_some());
        assert_eq!(error_status(first.as_ref(), "content missing"), None);
        assert!(error_status(first.as_ref(), "something else").is_some());
    }

    #[test]
    fn test_transition_rejects_cleared_name() {
        let old = VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some("c".into()),
            ..VolumeSnapshotStatus::default()
        };
        let cleared = VolumeSnapshotStatus::default();
        assert!(validate_transition("default/snap", Some(&old), &cleared).is_err());
    }

    #[test]
    fn test_transition_rejects_ready_with_error() {
        let mut bad = error_status(None, "boom").unwrap_or_default();
        bad.ready_to_use = Some(true);
        assert!(matches!(
            validate_transition("default/snap", None, &bad),
            Err(Error::IllegalStatusTransition { .. })
        ));
    }

    #[test]
    fn test_transition_rejects_shrinking_size() {
        let old = VolumeSnapshotStatus {
            restore_size: Some(2 * GIB),
            ..VolumeSnapshotStatus::default()
        };
        let new = VolumeSnapshotStatus {
            restore_size: Some(GIB),
            ..VolumeSnapshotStatus::default()
        };
        assert!(validate_transition("default/snap", Some(&old), &new).is_err());
    }

    fn arb_status() -> impl Strategy<Value = Option<VolumeSnapshotStatus>> {
        proptest::option::of(
            (
                proptest::option::of("[a-z]{1,8}"),
                proptest::option::of(any::<bool>()),
                proptest::option::of(0u64..4),
                any::<bool>(),
            )
                .prop_map(|(bound, ready, size, errored)| VolumeSnapshotStatus {
                    bound_volume_snapshot_content_name: bound,
                    ready_to_use: ready,
                    restore_size: size,
                    error: (errored && ready != Some(true))
                        .then(|| VolumeSnapshotError::now("earlier failure")),
                    creation_time: None,
                }),
        )
    }

    proptest! {
        #[test]
        fn prop_propagation_is_monotonic(
            current in arb_status(),
            ready in proptest::option::of(any::<bool>()),
            size in proptest::option::of(0u64..4),
        ) {
            let c = content(ready, size);
            if let Some(next) = propagate(current.as_ref(), &c) {
                prop_assert!(validate_transition("default/snap", current.as_ref(), &next).is_ok());
                prop_assert!(next.bound_volume_snapshot_content_name.is_some());
                prop_assert_eq!(propagate(Some(&next), &c), None);
            }
        }

        #[test]
        fn prop_error_status_never_ready(current in arb_status(), message in "[a-z ]{1,20}") {
            if let Some(next) = error_status(current.as_ref(), &message) {
                prop_assert_eq!(next.ready_to_use, Some(false));
                prop_assert!(validate_transition("default/snap", current.as_ref(), &next).is_ok());
            }
        }
    }
}
