//! Well-known annotation, finalizer and parameter names.
//!
//! These strings are part of the persisted record schema shared with the
//! realization agent and must not change.

/// Set on a content once its snapshot is gone or being torn down; tells the
/// realization agent to delete the underlying snapshot.
pub const ANN_SNAPSHOT_BEING_DELETED: &str =
    "snapshot.storage.kubernetes.io/volumesnapshot-being-deleted";

/// Name of the secret the agent needs to delete the snapshot.
pub const ANN_DELETION_SECRET_REF_NAME: &str = "snapshot.storage.kubernetes.io/deletion-secret-name";

/// Namespace of the secret the agent needs to delete the snapshot.
pub const ANN_DELETION_SECRET_REF_NAMESPACE: &str =
    "snapshot.storage.kubernetes.io/deletion-secret-namespace";

/// Marks a snapshot class as the default for its driver.
pub const ANN_DEFAULT_SNAPSHOT_CLASS: &str = "snapshot.storage.kubernetes.io/is-default-class";

/// Guards a content until nothing references it.
pub const CONTENT_FINALIZER: &str =
    "snapshot.storage.kubernetes.io/volumesnapshotcontent-bound-protection";

/// Guards a snapshot while a volume may still be restored from it.
pub const SNAPSHOT_AS_SOURCE_FINALIZER: &str =
    "snapshot.storage.kubernetes.io/volumesnapshot-as-source-protection";

/// Guards a snapshot while a content scheduled for deletion still points at it.
pub const SNAPSHOT_BOUND_FINALIZER: &str =
    "snapshot.storage.kubernetes.io/volumesnapshot-bound-protection";

/// Guards a claim while a snapshot is being taken from it.
pub const CLAIM_FINALIZER: &str = "snapshot.storage.kubernetes.io/pvc-as-source-protection";

/// Snapshot class parameter naming the snapshotter secret.
pub const PARAM_SNAPSHOTTER_SECRET_NAME: &str = "csi.storage.k8s.io/snapshotter-secret-name";

/// Snapshot class parameter naming the snapshotter secret namespace.
pub const PARAM_SNAPSHOTTER_SECRET_NAMESPACE: &str =
    "csi.storage.k8s.io/snapshotter-secret-namespace";

/// API group of snapshot records, as used in claim data sources.
pub const SNAPSHOT_API_GROUP: &str = "snapshot.storage.k8s.io";

/// Kind of snapshot records, as used in claim data sources.
pub const SNAPSHOT_KIND: &str = "VolumeSnapshot";

/// Prefix of dynamically created content names.
pub const CONTENT_NAME_PREFIX: &str = "snapcontent-";

/// One gibibyte, in bytes.
pub const GIB: u64 = 1 << 30;
