//! Persisted record schema.
//!
//! `VolumeSnapshot` is the user-facing request, `VolumeSnapshotContent` the
//! cluster-internal realized snapshot. The remaining kinds are read by the
//! controller while creating content or guarding source claims.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    ANN_DEFAULT_SNAPSHOT_CLASS, CONTENT_NAME_PREFIX, SNAPSHOT_API_GROUP, SNAPSHOT_KIND,
};
pub use crate::meta::{
    Lifecycle, ObjectMeta, ObjectReference, Resource, ResourceKind, Uid, object_key,
};

/// Error recorded on a snapshot or content status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshotError {
    pub time: DateTime<Utc>,
    pub message: String,
}

impl VolumeSnapshotError {
    /// Create an error stamped with the current time.
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            message: message.into(),
        }
    }
}

// ============================================================================
// VolumeSnapshot
// ============================================================================

/// Where a snapshot comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSnapshotSource {
    /// Dynamic provisioning from a live claim.
    PersistentVolumeClaimName(String),
    /// Static binding to an existing content.
    VolumeSnapshotContentName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    pub source: VolumeSnapshotSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeSnapshotError>,
}

/// User request to snapshot a claim or to adopt an existing content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshot {
    pub metadata: ObjectMeta,
    pub spec: VolumeSnapshotSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeSnapshotStatus>,
}

impl VolumeSnapshot {
    /// A snapshot of `claim`, to be provisioned dynamically.
    pub fn from_claim(
        namespace: impl Into<String>,
        name: impl Into<String>,
        claim: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: VolumeSnapshotSpec {
                source: VolumeSnapshotSource::PersistentVolumeClaimName(claim.into()),
                volume_snapshot_class_name: None,
            },
            status: None,
        }
    }

    /// A snapshot bound statically to the content `content`.
    pub fn from_content(
        namespace: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: VolumeSnapshotSpec {
                source: VolumeSnapshotSource::VolumeSnapshotContentName(content.into()),
                volume_snapshot_class_name: None,
            },
            status: None,
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.spec.volume_snapshot_class_name = Some(class.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.metadata.namespace_or_default()
    }

    #[must_use]
    pub const fn uid(&self) -> &Uid {
        &self.metadata.uid
    }

    #[must_use]
    pub fn key(&self) -> String {
        self.metadata.key()
    }

    #[must_use]
    pub fn class_name(&self) -> Option<&str> {
        self.spec.volume_snapshot_class_name.as_deref()
    }

    /// Source claim name, for dynamically provisioned snapshots.
    #[must_use]
    pub fn claim_name(&self) -> Option<&str> {
        match &self.spec.source {
            VolumeSnapshotSource::PersistentVolumeClaimName(name) => Some(name),
            VolumeSnapshotSource::VolumeSnapshotContentName(_) => None,
        }
    }

    /// Requested content name, for pre-provisioned snapshots.
    #[must_use]
    pub fn source_content_name(&self) -> Option<&str> {
        match &self.spec.source {
            VolumeSnapshotSource::VolumeSnapshotContentName(name) => Some(name),
            VolumeSnapshotSource::PersistentVolumeClaimName(_) => None,
        }
    }

    #[must_use]
    pub const fn is_pre_provisioned(&self) -> bool {
        matches!(
            self.spec.source,
            VolumeSnapshotSource::VolumeSnapshotContentName(_)
        )
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }

    /// Bound content name, when recorded and non-empty.
    #[must_use]
    pub fn bound_content_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bound_volume_snapshot_content_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .map(|e| e.message.as_str())
    }

    /// Name a dynamically created content for this snapshot gets.
    #[must_use]
    pub fn derived_content_name(&self) -> String {
        format!("{CONTENT_NAME_PREFIX}{}", self.metadata.uid)
    }
}

impl Resource for VolumeSnapshot {
    const KIND: ResourceKind = ResourceKind::Snapshot;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn with_status_from(self, other: &Self) -> Self {
        Self {
            status: other.status.clone(),
            ..self
        }
    }
}

// ============================================================================
// VolumeSnapshotContent
// ============================================================================

/// Back-reference from a content to its snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReference {
    pub namespace: String,
    pub name: String,
    /// Empty until the binding is decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uid>,
}

impl SnapshotReference {
    #[must_use]
    pub fn key(&self) -> String {
        object_key(Some(&self.namespace), &self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeSnapshotContentSource {
    /// Live volume still to be snapshotted.
    VolumeHandle(String),
    /// Snapshot that already exists on the storage backend.
    SnapshotHandle(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    pub volume_snapshot_ref: SnapshotReference,
    pub source: VolumeSnapshotContentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
    pub deletion_policy: DeletionPolicy,
    pub driver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeSnapshotError>,
}

/// Cluster-internal record of a realized (or to be realized) snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnapshotContent {
    pub metadata: ObjectMeta,
    pub spec: VolumeSnapshotContentSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeSnapshotContentStatus>,
}

impl VolumeSnapshotContent {
    /// A content describing an existing backend snapshot, reserved for the
    /// snapshot `namespace/snapshot` but not bound to any UID yet.
    pub fn pre_provisioned(
        name: impl Into<String>,
        namespace: impl Into<String>,
        snapshot: impl Into<String>,
        snapshot_handle: impl Into<String>,
        driver: impl Into<String>,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            metadata: ObjectMeta::cluster_scoped(name),
            spec: VolumeSnapshotContentSpec {
                volume_snapshot_ref: SnapshotReference {
                    namespace: namespace.into(),
                    name: snapshot.into(),
                    uid: None,
                },
                source: VolumeSnapshotContentSource::SnapshotHandle(snapshot_handle.into()),
                volume_snapshot_class_name: None,
                deletion_policy,
                driver: driver.into(),
            },
            status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: VolumeSnapshotContentStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }

    /// UID of the bound snapshot, once the binding is decided.
    #[must_use]
    pub fn bound_uid(&self) -> Option<&Uid> {
        self.spec
            .volume_snapshot_ref
            .uid
            .as_ref()
            .filter(|uid| !uid.is_empty())
    }

    #[must_use]
    pub const fn has_snapshot_handle(&self) -> bool {
        matches!(
            self.spec.source,
            VolumeSnapshotContentSource::SnapshotHandle(_)
        )
    }
}

impl Resource for VolumeSnapshotContent {
    const KIND: ResourceKind = ResourceKind::Content;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn with_status_from(self, other: &Self) -> Self {
        Self {
            status: other.status.clone(),
            ..self
        }
    }
}

// ============================================================================
// Claims, volumes and classes
// ============================================================================

/// Typed reference used as a claim's data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedLocalObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    pub kind: String,
    pub name: String,
}

impl TypedLocalObjectReference {
    /// Reference to the snapshot `name`.
    pub fn snapshot(name: impl Into<String>) -> Self {
        Self {
            api_group: Some(SNAPSHOT_API_GROUP.to_string()),
            kind: SNAPSHOT_KIND.to_string(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_snapshot(&self, name: &str) -> bool {
        self.name == name
            && self.kind == SNAPSHOT_KIND
            && self.api_group.as_deref() == Some(SNAPSHOT_API_GROUP)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<TypedLocalObjectReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaimStatus {
    pub phase: ClaimPhase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeClaimSpec,
    #[serde(default)]
    pub status: PersistentVolumeClaimStatus,
}

impl PersistentVolumeClaim {
    /// A claim bound to the volume `volume`.
    pub fn bound(
        namespace: impl Into<String>,
        name: impl Into<String>,
        volume: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: PersistentVolumeClaimSpec {
                volume_name: Some(volume.into()),
                ..PersistentVolumeClaimSpec::default()
            },
            status: PersistentVolumeClaimStatus {
                phase: ClaimPhase::Bound,
            },
        }
    }

    /// A pending claim that restores its data from the snapshot `snapshot`.
    pub fn restoring_from(
        namespace: impl Into<String>,
        name: impl Into<String>,
        snapshot: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::namespaced(namespace, name),
            spec: PersistentVolumeClaimSpec {
                data_source: Some(TypedLocalObjectReference::snapshot(snapshot)),
                ..PersistentVolumeClaimSpec::default()
            },
            status: PersistentVolumeClaimStatus::default(),
        }
    }

    #[must_use]
    pub fn with_storage_class(mut self, class: impl Into<String>) -> Self {
        self.spec.storage_class_name = Some(class.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status.phase == ClaimPhase::Pending
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.status.phase == ClaimPhase::Bound
    }

    /// Whether this claim is being populated from the snapshot `snapshot`.
    #[must_use]
    pub fn restores_from(&self, snapshot: &str) -> bool {
        self.spec
            .data_source
            .as_ref()
            .is_some_and(|source| source.is_snapshot(snapshot))
    }
}

impl Resource for PersistentVolumeClaim {
    const KIND: ResourceKind = ResourceKind::Claim;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn with_status_from(self, other: &Self) -> Self {
        Self {
            status: other.status.clone(),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolumeSource {
    pub driver: String,
    pub volume_handle: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeSpec {
    pub capacity: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi: Option<CsiVolumeSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolume {
    pub metadata: ObjectMeta,
    pub spec: PersistentVolumeSpec,
}

impl PersistentVolume {
    /// A CSI volume of `capacity` bytes.
    pub fn csi(
        name: impl Into<String>,
        driver: impl Into<String>,
        volume_handle: impl Into<String>,
        capacity: u64,
    ) -> Self {
        Self {
            metadata: ObjectMeta::cluster_scoped(name),
            spec: PersistentVolumeSpec {
                capacity,
                storage_class_name: None,
                csi: Some(CsiVolumeSource {
                    driver: driver.into(),
                    volume_handle: volume_handle.into(),
                }),
            },
        }
    }
}

impl Resource for PersistentVolume {
    const KIND: ResourceKind = ResourceKind::Volume;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Policy applied to dynamically created contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    pub metadata: ObjectMeta,
    pub driver: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    pub deletion_policy: DeletionPolicy,
}

impl VolumeSnapshotClass {
    pub fn new(
        name: impl Into<String>,
        driver: impl Into<String>,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            metadata: ObjectMeta::cluster_scoped(name),
            driver: driver.into(),
            parameters: BTreeMap::new(),
            deletion_policy,
        }
    }

    /// Mark the class as the default for its driver.
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.metadata = self.metadata.with_annotation(ANN_DEFAULT_SNAPSHOT_CLASS, "true");
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.metadata.annotation(ANN_DEFAULT_SNAPSHOT_CLASS) == Some("true")
    }
}

impl Resource for VolumeSnapshotClass {
    const KIND: ResourceKind = ResourceKind::SnapshotClass;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClass {
    pub metadata: ObjectMeta,
    pub provisioner: String,
}

impl StorageClass {
    pub fn new(name: impl Into<String>, provisioner: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::cluster_scoped(name),
            provisioner: provisioner.into(),
        }
    }
}

impl Resource for StorageClass {
    const KIND: ResourceKind = ResourceKind::StorageClass;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::GIB;

    #[test]
    fn test_snapshot_source_accessors() {
        let dynamic = VolumeSnapshot::from_claim("default", "snap", "data").with_class("gold");
        assert_eq!(dynamic.claim_name(), Some("data"));
        assert_eq!(dynamic.source_content_name(), None);
        assert_eq!(dynamic.class_name(), Some("gold"));
        assert!(!dynamic.is_pre_provisioned());

        let static_snap = VolumeSnapshot::from_content("default", "snap", "content-x");
        assert_eq!(static_snap.source_content_name(), Some("content-x"));
        assert!(static_snap.is_pre_provisioned());
    }

    #[test]
    fn test_empty_bound_name_is_unset() {
        let mut snap = VolumeSnapshot::from_claim("default", "snap", "data");
        snap.status = Some(VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some(String::new()),
            ..VolumeSnapshotStatus::default()
        });
        assert_eq!(snap.bound_content_name(), None);
    }

    #[test]
    fn test_derived_content_name_uses_uid() {
        let mut snap = VolumeSnapshot::from_claim("default", "snap", "data");
        snap.metadata.uid = Uid::new("abc");
        assert_eq!(snap.derived_content_name(), "snapcontent-abc");
    }

    #[test]
    fn test_snapshot_wire_format() {
        let mut snap = VolumeSnapshot::from_claim("default", "snap", "data").with_class("gold");
        snap.status = Some(VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: Some("snapcontent-1".into()),
            ready_to_use: Some(true),
            restore_size: Some(10 * GIB),
            ..VolumeSnapshotStatus::default()
        });

        let json = serde_json::to_value(&snap).unwrap_or_default();
        assert_eq!(json["spec"]["source"]["persistentVolumeClaimName"], "data");
        assert_eq!(json["spec"]["volumeSnapshotClassName"], "gold");
        assert_eq!(
            json["status"]["boundVolumeSnapshotContentName"],
            "snapcontent-1"
        );
        assert_eq!(json["status"]["readyToUse"], true);
    }

    #[test]
    fn test_claim_restores_from_requires_snapshot_kind() {
        let claim = PersistentVolumeClaim::restoring_from("default", "restore", "snap");
        assert!(claim.restores_from("snap"));
        assert!(!claim.restores_from("other"));

        let mut foreign = claim.clone();
        if let Some(source) = foreign.spec.data_source.as_mut() {
            source.kind = "PersistentVolumeClaim".into();
        }
        assert!(!foreign.restores_from("snap"));
    }

    #[test]
    fn test_default_class_annotation() {
        let class = VolumeSnapshotClass::new("gold", "csi.example.com", DeletionPolicy::Delete);
        assert!(!class.is_default());
        assert!(class.as_default().is_default());
    }
}
