//! Local object cache.
//!
//! An eventually consistent mirror of the collections the controller reads.
//! Each collection has its own typed [`Store`], so a lookup can never yield
//! an object of the wrong kind. Cached objects are shared `Arc`s and are
//! never mutated in place; writers replace them with a newer version.

use std::sync::{Arc, RwLock};

use im::HashMap;
use itertools::Itertools;

use crate::error::CacheError;
use crate::meta::Resource;
use crate::types::{
    PersistentVolumeClaim, VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent,
};

/// Typed store of one collection, keyed by `namespace/name` (or `name`).
pub struct Store<T: Resource> {
    items: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: Resource> Default for Store<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Resource> Store<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<HashMap<String, Arc<T>>, CacheError> {
        self.items
            .read()
            .map(|items| items.clone())
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })
    }

    /// Look up an object by key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn get_by_key(&self, key: &str) -> Result<Option<Arc<T>>, CacheError> {
        self.items
            .read()
            .map(|items| items.get(key).cloned())
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })
    }

    /// All cached objects, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn list(&self) -> Result<Vec<Arc<T>>, CacheError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, obj)| obj)
            .collect())
    }

    /// Cached objects in one namespace, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn list_namespace(&self, namespace: &str) -> Result<Vec<Arc<T>>, CacheError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|obj| obj.metadata().namespace_or_default() == namespace)
            .collect())
    }

    /// Insert or replace an object.
    ///
    /// An object older than the cached one (lower `resourceVersion`) is
    /// ignored. Returns whether the cache changed.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn update(&self, obj: T) -> Result<bool, CacheError> {
        let key = obj.key();
        let mut items = self
            .items
            .write()
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })?;

        let stale = items.get(&key).is_some_and(|cached| {
            cached.metadata().resource_version > obj.metadata().resource_version
        });
        if stale {
            tracing::debug!(
                kind = %T::KIND,
                key = %key,
                version = obj.metadata().resource_version,
                "ignoring stale object"
            );
            return Ok(false);
        }

        items.insert(key, Arc::new(obj));
        Ok(true)
    }

    /// Remove an object. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.items
            .write()
            .map(|mut items| items.remove(key).is_some())
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })
    }

    /// Replace the whole collection.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn replace(&self, objs: impl IntoIterator<Item = T>) -> Result<(), CacheError> {
        let fresh: HashMap<String, Arc<T>> =
            objs.into_iter().map(|obj| (obj.key(), Arc::new(obj))).collect();
        let mut items = self
            .items
            .write()
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })?;
        *items = fresh;
        Ok(())
    }

    /// Number of cached objects.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn len(&self) -> Result<usize, CacheError> {
        self.items
            .read()
            .map(|items| items.len())
            .map_err(|_| CacheError::Poisoned { kind: T::KIND })
    }

    /// Whether the store is empty.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Poisoned` if a writer panicked.
    pub fn is_empty(&self) -> Result<bool, CacheError> {
        self.len().map(|n| n == 0)
    }
}

/// The collections a reconciler reads from.
///
/// Cloning shares the underlying stores.
#[derive(Clone, Default)]
pub struct ObjectCache {
    pub snapshots: Arc<Store<VolumeSnapshot>>,
    pub contents: Arc<Store<VolumeSnapshotContent>>,
    pub claims: Arc<Store<PersistentVolumeClaim>>,
    pub classes: Arc<Store<VolumeSnapshotClass>>,
}

impl ObjectCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(name: &str, version: u64) -> VolumeSnapshotContent {
        let mut content = VolumeSnapshotContent::pre_provisioned(
            name,
            "default",
            "snap",
            "handle",
            "csi.example.com",
            crate::types::DeletionPolicy::Delete,
        );
        content.metadata.resource_version = version;
        content
    }

    #[test]
    fn test_update_and_get() {
        let store = Store::new();
        assert_eq!(store.update(content("c1", 1)), Ok(true));

        let cached = store.get_by_key("c1").ok().flatten();
        assert_eq!(cached.map(|c| c.metadata.resource_version), Some(1));
        assert_eq!(store.get_by_key("missing").ok().flatten(), None);
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let store = Store::new();
        assert_eq!(store.update(content("c1", 5)), Ok(true));
        assert_eq!(store.update(content("c1", 3)), Ok(false));
        assert_eq!(store.update(content("c1", 5)), Ok(true));

        let cached = store.get_by_key("c1").ok().flatten();
        assert_eq!(cached.map(|c| c.metadata.resource_version), Some(5));
    }

    #[test]
    fn test_list_namespace_filters() {
        let store = Store::new();
        let a = VolumeSnapshot::from_claim("team-a", "s1", "data");
        let b = VolumeSnapshot::from_claim("team-b", "s1", "data");
        let a2 = VolumeSnapshot::from_claim("team-a", "s2", "data");
        for snap in [a, b, a2] {
            assert!(store.update(snap).is_ok());
        }

        let names: Vec<String> = store
            .list_namespace("team-a")
            .unwrap_or_default()
            .iter()
            .map(|s| s.key())
            .collect();
        assert_eq!(names, vec!["team-a/s1".to_string(), "team-a/s2".to_string()]);
    }

    #[test]
    fn test_replace_and_delete() {
        let store = Store::new();
        assert!(store.update(content("old", 1)).is_ok());
        assert!(store.replace([content("c1", 1), content("c2", 1)]).is_ok());

        assert_eq!(store.len(), Ok(2));
        assert_eq!(store.get_by_key("old").ok().flatten(), None);
        assert_eq!(store.delete("c1"), Ok(true));
        assert_eq!(store.delete("c1"), Ok(false));
    }

    #[test]
    fn test_cloned_cache_shares_stores() {
        let cache = ObjectCache::new();
        let view = cache.clone();
        assert!(cache.contents.update(content("c1", 1)).is_ok());
        assert_eq!(view.contents.len(), Ok(1));
    }
}
