//! Object metadata shared by every record kind.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// The record collections the controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Snapshot,
    Content,
    Claim,
    Volume,
    SnapshotClass,
    StorageClass,
}

impl ResourceKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "VolumeSnapshot",
            Self::Content => "VolumeSnapshotContent",
            Self::Claim => "PersistentVolumeClaim",
            Self::Volume => "PersistentVolume",
            Self::SnapshotClass => "VolumeSnapshotClass",
            Self::StorageClass => "StorageClass",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier assigned to a record when it is created.
///
/// Two records with the same name but different UIDs are different
/// generations: the older one was deleted and replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Create a new random UID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Wrap an existing UID string.
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cache and queue key of a record: `namespace/name`, or `name` for
/// cluster-scoped records.
#[must_use]
pub fn object_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Deletion state of a record under the two-phase delete protocol.
///
/// `Active` → `DeletionRequested { guards > 0 }` →
/// `DeletionRequested { guards: 0 }` → removed from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No deletion requested.
    Active,
    /// Deletion timestamp set; `guards` finalizers still block removal.
    DeletionRequested { guards: usize },
}

impl Lifecycle {
    /// Whether the store may physically remove the record.
    #[must_use]
    pub const fn is_removable(self) -> bool {
        matches!(self, Self::DeletionRequested { guards: 0 })
    }
}

/// Metadata carried by every record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub uid: Uid,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Metadata for a cluster-scoped record.
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Metadata for a namespaced record.
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        object_key(self.namespace.as_deref(), &self.name)
    }

    /// Namespace, or the empty string for cluster-scoped records.
    #[must_use]
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Add a finalizer if it is not present yet.
    #[must_use]
    pub fn with_finalizer(mut self, finalizer: &str) -> Self {
        if !self.has_finalizer(finalizer) {
            self.finalizers.push(finalizer.to_string());
        }
        self
    }

    /// Remove every occurrence of a finalizer.
    #[must_use]
    pub fn without_finalizer(mut self, finalizer: &str) -> Self {
        self.finalizers.retain(|f| f != finalizer);
        self
    }

    #[must_use]
    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub const fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        if self.deletion_timestamp.is_some() {
            Lifecycle::DeletionRequested {
                guards: self.finalizers.len(),
            }
        } else {
            Lifecycle::Active
        }
    }
}

/// Reference to a record, attached to audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub uid: Uid,
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.kind,
            object_key(self.namespace.as_deref(), &self.name)
        )
    }
}

/// Common behaviour of stored records.
pub trait Resource: Clone + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Replace this record's status with the status of `other`.
    ///
    /// Used by stores that keep status as a separate subresource; kinds
    /// without a status return `self` unchanged.
    #[must_use]
    fn with_status_from(self, _other: &Self) -> Self {
        self
    }

    fn key(&self) -> String {
        self.metadata().key()
    }

    fn reference(&self) -> ObjectReference {
        let meta = self.metadata();
        ObjectReference {
            kind: Self::KIND,
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
            uid: meta.uid.clone(),
        }
    }
}
