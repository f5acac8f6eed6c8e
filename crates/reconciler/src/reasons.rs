//! Event reasons emitted by the reconcilers.

use std::fmt;

/// Reason attached to an audit event or an error status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reason {
    /// A ready snapshot's bound content is gone.
    ContentMissing,
    /// A ready snapshot's content points at someone else.
    Misbound,
    /// A pre-provisioned content cannot be bound to the snapshot.
    BindFailed,
    /// Status could not be written after all retries.
    StatusUpdateFailed,
    /// A dynamic snapshot matched a content that already has a snapshot handle.
    HandleNotFound,
    /// The recorded bound content is not in the cache.
    ContentNotFound,
    /// A dynamic snapshot has no source claim.
    PvcSourceMissing,
    /// Content creation failed; reported on the snapshot status.
    ContentCreationFailed,
    /// Content creation failed after all retries.
    CreateContentFailed,
    /// Deleting the content failed.
    ContentDeleteError,
    /// Releasing the source claim's finalizer failed.
    PvcFinalizerError,
    /// The named snapshot class does not exist.
    GetClassFailed,
    /// No unique default snapshot class.
    SetDefaultClassFailed,
    /// A content was created for the snapshot.
    ContentCreated,
    /// The snapshot was bound to its content.
    Bound,
}

impl Reason {
    /// Wire name of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ContentMissing => "SnapshotContentMissing",
            Self::Misbound => "SnapshotMisbound",
            Self::BindFailed => "SnapshotBindFailed",
            Self::StatusUpdateFailed => "SnapshotStatusUpdateFailed",
            Self::HandleNotFound => "SnapshotHandleNotFound",
            Self::ContentNotFound => "SnapshotContentNotFound",
            Self::PvcSourceMissing => "SnapshotPVCSourceMissing",
            Self::ContentCreationFailed => "SnapshotContentCreationFailed",
            Self::CreateContentFailed => "CreateSnapshotContentFailed",
            Self::ContentDeleteError => "SnapshotContentObjectDeleteError",
            Self::PvcFinalizerError => "ErrorPVCFinalizer",
            Self::GetClassFailed => "GetSnapshotClassFailed",
            Self::SetDefaultClassFailed => "SetDefaultSnapshotClassFailed",
            Self::ContentCreated => "SnapshotContentCreated",
            Self::Bound => "SnapshotBound",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
