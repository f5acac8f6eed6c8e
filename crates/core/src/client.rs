//! API client boundary.
//!
//! The API server is the source of truth. Every write goes through this
//! trait; the controller mirrors the returned object into its
//! [`ObjectCache`](crate::cache::ObjectCache) afterwards.

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::types::{
    PersistentVolume, PersistentVolumeClaim, StorageClass, VolumeSnapshot, VolumeSnapshotContent,
};

/// Writes and authoritative reads against the cluster API.
///
/// `update` writes spec and metadata and keeps the stored status;
/// `update_*_status` writes only the status. Both fail with `Conflict` when
/// the object's `resourceVersion` is stale.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Read a snapshot by namespace and name.
    async fn get_snapshot(&self, namespace: &str, name: &str) -> ApiResult<VolumeSnapshot>;

    /// Update a snapshot's spec and metadata.
    async fn update_snapshot(&self, snapshot: &VolumeSnapshot) -> ApiResult<VolumeSnapshot>;

    /// Update a snapshot's status.
    async fn update_snapshot_status(&self, snapshot: &VolumeSnapshot)
    -> ApiResult<VolumeSnapshot>;

    /// Read a content by name.
    async fn get_content(&self, name: &str) -> ApiResult<VolumeSnapshotContent>;

    /// Create a content. Fails with `AlreadyExists` if the name is taken.
    async fn create_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent>;

    /// Update a content's spec and metadata.
    async fn update_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent>;

    /// Update a content's status.
    async fn update_content_status(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent>;

    /// Request deletion of a content.
    async fn delete_content(&self, name: &str) -> ApiResult<()>;

    /// Read a claim by namespace and name.
    async fn get_claim(&self, namespace: &str, name: &str) -> ApiResult<PersistentVolumeClaim>;

    /// Update a claim's spec and metadata.
    async fn update_claim(&self, claim: &PersistentVolumeClaim)
    -> ApiResult<PersistentVolumeClaim>;

    /// Read a volume by name.
    async fn get_volume(&self, name: &str) -> ApiResult<PersistentVolume>;

    /// Read a storage class by name.
    async fn get_storage_class(&self, name: &str) -> ApiResult<StorageClass>;
}
