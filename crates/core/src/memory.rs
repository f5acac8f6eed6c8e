//! In-memory cluster.
//!
//! A small API server used by tests and demos. It implements the parts of
//! the real server's contract the controller depends on:
//!
//! - UID and `resourceVersion` assignment on create, `AlreadyExists` on a
//!   duplicate name
//! - optimistic concurrency: a write carrying a stale `resourceVersion`
//!   fails with `Conflict`
//! - a status subresource: `update` keeps the stored status, `update_status`
//!   keeps the stored spec and metadata
//! - two-phase delete: `delete` on a record with finalizers only stamps a
//!   deletion timestamp, and the write that releases the last finalizer of
//!   such a record removes it
//!
//! Controller writes are appended to a journal. Tests can inject failures
//! for the next N calls of a verb, and act as other cluster participants
//! (users, the realization agent) through [`InMemoryCluster::modify`] and
//! [`InMemoryCluster::request_deletion`], which bypass the journal.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use im::OrdMap;
use tokio::sync::RwLock;

use crate::cache::ObjectCache;
use crate::client::ApiClient;
use crate::error::{ApiError, ApiResult, CacheError};
use crate::meta::{Resource, ResourceKind, Uid, object_key};
use crate::types::{
    PersistentVolume, PersistentVolumeClaim, StorageClass, VolumeSnapshot, VolumeSnapshotClass,
    VolumeSnapshotContent,
};

/// Write verbs, as recorded in the journal and matched by fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateStatus => "update-status",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One successful controller write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub verb: Verb,
    pub kind: ResourceKind,
    pub key: String,
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.verb, self.kind, self.key)
    }
}

#[derive(Debug)]
struct Fault {
    verb: Verb,
    kind: ResourceKind,
    remaining: u32,
    error: ApiError,
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Spec,
    Status,
}

/// One collection of records, ordered by key.
pub struct Collection<T: Resource> {
    items: RwLock<OrdMap<String, T>>,
}

impl<T: Resource> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(OrdMap::new()),
        }
    }
}

impl<T: Resource> Collection<T> {
    /// Read a record by key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has that key.
    pub async fn get(&self, key: &str) -> ApiResult<T> {
        self.items
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ApiError::not_found(T::KIND, key))
    }

    /// All records, ordered by key.
    pub async fn list(&self) -> Vec<T> {
        self.items.read().await.values().cloned().collect()
    }

    async fn create(&self, obj: &T, version: u64) -> ApiResult<T> {
        let key = obj.key();
        let mut items = self.items.write().await;
        if items.contains_key(&key) {
            return Err(ApiError::already_exists(T::KIND, key));
        }

        let mut created = obj.clone();
        let meta = created.metadata_mut();
        if meta.uid.is_empty() {
            meta.uid = Uid::generate();
        }
        meta.resource_version = version;
        meta.deletion_timestamp = None;

        items.insert(key, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &T, mode: WriteMode, version: u64) -> ApiResult<T> {
        let key = obj.key();
        let mut items = self.items.write().await;
        let stored = items
            .get(&key)
            .cloned()
            .ok_or_else(|| ApiError::not_found(T::KIND, &key))?;

        let stored_version = stored.metadata().resource_version;
        if stored_version != obj.metadata().resource_version {
            return Err(ApiError::conflict(
                T::KIND,
                key,
                format!(
                    "resourceVersion {} does not match stored {stored_version}",
                    obj.metadata().resource_version
                ),
            ));
        }

        let mut next = match mode {
            WriteMode::Spec => obj.clone().with_status_from(&stored),
            WriteMode::Status => stored.clone().with_status_from(obj),
        };
        let meta = next.metadata_mut();
        meta.uid = stored.metadata().uid.clone();
        meta.deletion_timestamp = stored.metadata().deletion_timestamp;
        meta.resource_version = version;

        if next.metadata().lifecycle().is_removable() {
            items.remove(&key);
        } else {
            items.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn delete(&self, key: &str, version: u64) -> ApiResult<()> {
        let mut items = self.items.write().await;
        let Some(mut stored) = items.get(key).cloned() else {
            return Err(ApiError::not_found(T::KIND, key));
        };

        if stored.metadata().finalizers.is_empty() {
            items.remove(key);
        } else if !stored.metadata().is_being_deleted() {
            let meta = stored.metadata_mut();
            meta.deletion_timestamp = Some(Utc::now());
            meta.resource_version = version;
            items.insert(key.to_string(), stored);
        }
        Ok(())
    }

    /// Apply `f` to the stored record without a version check.
    async fn modify(&self, key: &str, version: u64, f: impl FnOnce(&mut T)) -> ApiResult<T> {
        let mut items = self.items.write().await;
        let Some(mut obj) = items.get(key).cloned() else {
            return Err(ApiError::not_found(T::KIND, key));
        };
        f(&mut obj);
        obj.metadata_mut().resource_version = version;

        if obj.metadata().lifecycle().is_removable() {
            items.remove(key);
        } else {
            items.insert(key.to_string(), obj.clone());
        }
        Ok(obj)
    }
}

/// Access to the collection holding records of type `T`.
pub trait HasCollection<T: Resource> {
    fn collection(&self) -> &Collection<T>;
}

/// In-memory implementation of [`ApiClient`].
#[derive(Default)]
pub struct InMemoryCluster {
    snapshots: Collection<VolumeSnapshot>,
    contents: Collection<VolumeSnapshotContent>,
    claims: Collection<PersistentVolumeClaim>,
    volumes: Collection<PersistentVolume>,
    classes: Collection<VolumeSnapshotClass>,
    storage_classes: Collection<StorageClass>,
    version: AtomicU64,
    journal: Mutex<Vec<JournalEntry>>,
    faults: Mutex<Vec<Fault>>,
}

macro_rules! has_collection {
    ($ty:ty, $field:ident) => {
        impl HasCollection<$ty> for InMemoryCluster {
            fn collection(&self) -> &Collection<$ty> {
                &self.$field
            }
        }
    };
}

has_collection!(VolumeSnapshot, snapshots);
has_collection!(VolumeSnapshotContent, contents);
has_collection!(PersistentVolumeClaim, claims);
has_collection!(PersistentVolume, volumes);
has_collection!(VolumeSnapshotClass, classes);
has_collection!(StorageClass, storage_classes);

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Store a new record as another participant would, outside the journal.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the key is taken.
    pub async fn seed<T: Resource>(&self, obj: T) -> ApiResult<T>
    where
        Self: HasCollection<T>,
    {
        let version = self.next_version();
        <Self as HasCollection<T>>::collection(self).create(&obj, version).await
    }

    /// Current stored record, if any.
    pub async fn get<T: Resource>(&self, key: &str) -> Option<T>
    where
        Self: HasCollection<T>,
    {
        <Self as HasCollection<T>>::collection(self).get(key).await.ok()
    }

    /// All stored records of one kind.
    pub async fn list<T: Resource>(&self) -> Vec<T>
    where
        Self: HasCollection<T>,
    {
        <Self as HasCollection<T>>::collection(self).list().await
    }

    /// Mutate a record as another participant would, outside the journal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record does not exist.
    pub async fn modify<T: Resource>(&self, key: &str, f: impl FnOnce(&mut T)) -> ApiResult<T>
    where
        Self: HasCollection<T>,
    {
        let version = self.next_version();
        <Self as HasCollection<T>>::collection(self).modify(key, version, f).await
    }

    /// Delete a record as a user would, outside the journal.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the record does not exist.
    pub async fn request_deletion<T: Resource>(&self, key: &str) -> ApiResult<()>
    where
        Self: HasCollection<T>,
    {
        let version = self.next_version();
        <Self as HasCollection<T>>::collection(self).delete(key, version).await
    }

    /// Make the next `times` calls of `verb` on `kind` fail with `error`.
    pub fn fail_next(&self, verb: Verb, kind: ResourceKind, times: u32, error: ApiError) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.push(Fault {
                verb,
                kind,
                remaining: times,
                error,
            });
        }
    }

    fn take_fault(&self, verb: Verb, kind: ResourceKind) -> ApiResult<()> {
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        let Some(fault) = faults
            .iter_mut()
            .find(|f| f.verb == verb && f.kind == kind && f.remaining > 0)
        else {
            return Ok(());
        };
        fault.remaining -= 1;
        let error = fault.error.clone();
        faults.retain(|f| f.remaining > 0);
        Err(error)
    }

    fn log(&self, verb: Verb, kind: ResourceKind, key: String) {
        tracing::trace!(verb = %verb, kind = %kind, key = %key, "cluster write");
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(JournalEntry { verb, kind, key });
        }
    }

    /// Controller writes so far, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal
            .lock()
            .map(|journal| journal.clone())
            .unwrap_or_default()
    }

    /// Number of controller writes so far.
    #[must_use]
    pub fn journal_len(&self) -> usize {
        self.journal.lock().map(|journal| journal.len()).unwrap_or(0)
    }

    /// Controller writes after the first `mark` entries.
    #[must_use]
    pub fn writes_since(&self, mark: usize) -> Vec<JournalEntry> {
        self.journal().into_iter().skip(mark).collect()
    }

    async fn create_logged<T: Resource>(&self, obj: &T) -> ApiResult<T>
    where
        Self: HasCollection<T>,
    {
        self.take_fault(Verb::Create, T::KIND)?;
        let version = self.next_version();
        let created = <Self as HasCollection<T>>::collection(self).create(obj, version).await?;
        self.log(Verb::Create, T::KIND, created.key());
        Ok(created)
    }

    async fn update_logged<T: Resource>(&self, obj: &T, mode: WriteMode) -> ApiResult<T>
    where
        Self: HasCollection<T>,
    {
        let verb = match mode {
            WriteMode::Spec => Verb::Update,
            WriteMode::Status => Verb::UpdateStatus,
        };
        self.take_fault(verb, T::KIND)?;
        let version = self.next_version();
        let updated = <Self as HasCollection<T>>::collection(self).update(obj, mode, version).await?;
        self.log(verb, T::KIND, updated.key());
        Ok(updated)
    }

    async fn get_checked<T: Resource>(&self, key: &str) -> ApiResult<T>
    where
        Self: HasCollection<T>,
    {
        <Self as HasCollection<T>>::collection(self).get(key).await
    }

    /// Mirror the stored state into `cache`, as a watch would.
    ///
    /// # Errors
    ///
    /// Returns a `CacheError` if a cache store is poisoned.
    pub async fn sync_cache(&self, cache: &ObjectCache) -> Result<(), CacheError> {
        cache.snapshots.replace(self.snapshots.list().await)?;
        cache.contents.replace(self.contents.list().await)?;
        cache.claims.replace(self.claims.list().await)?;
        cache.classes.replace(self.classes.list().await)?;
        Ok(())
    }
}

#[async_trait]
impl ApiClient for InMemoryCluster {
    async fn get_snapshot(&self, namespace: &str, name: &str) -> ApiResult<VolumeSnapshot> {
        self.get_checked(&object_key(Some(namespace), name)).await
    }

    async fn update_snapshot(&self, snapshot: &VolumeSnapshot) -> ApiResult<VolumeSnapshot> {
        self.update_logged(snapshot, WriteMode::Spec).await
    }

    async fn update_snapshot_status(
        &self,
        snapshot: &VolumeSnapshot,
    ) -> ApiResult<VolumeSnapshot> {
        self.update_logged(snapshot, WriteMode::Status).await
    }

    async fn get_content(&self, name: &str) -> ApiResult<VolumeSnapshotContent> {
        self.get_checked(name).await
    }

    async fn create_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent> {
        self.create_logged(content).await
    }

    async fn update_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent> {
        self.update_logged(content, WriteMode::Spec).await
    }

    async fn update_content_status(
        &self,
        content: &VolumeSnapshotContent,
    ) -> ApiResult<VolumeSnapshotContent> {
        self.update_logged(content, WriteMode::Status).await
    }

    async fn delete_content(&self, name: &str) -> ApiResult<()> {
        self.take_fault(Verb::Delete, ResourceKind::Content)?;
        let version = self.next_version();
        self.contents.delete(name, version).await?;
        self.log(Verb::Delete, ResourceKind::Content, name.to_string());
        Ok(())
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> ApiResult<PersistentVolumeClaim> {
        self.get_checked(&object_key(Some(namespace), name)).await
    }

    async fn update_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> ApiResult<PersistentVolumeClaim> {
        self.update_logged(claim, WriteMode::Spec).await
    }

    async fn get_volume(&self, name: &str) -> ApiResult<PersistentVolume> {
        self.get_checked(name).await
    }

    async fn get_storage_class(&self, name: &str) -> ApiResult<StorageClass> {
        self.get_checked(name).await
    }
}
