//! In-process read cache for the file backend.
//!
//! One entry per collection, holding the last parsed document. The cache is
//! an explicit component owned by the backend — nothing outside the file
//! backend can reach it — and is only ever *invalidated* after writes and on
//! external-change notifications, never updated in place. That keeps the read
//! path the single authority on defaulting and parsing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::Collection;

/// Mutex-guarded per-collection cache. Cloning shares the underlying map, so
/// the watcher task can hold an invalidation handle.
#[derive(Clone, Default)]
pub struct CollectionCache {
    inner: Arc<Mutex<HashMap<Collection, Value>>>,
}

impl CollectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: Collection) -> Option<Value> {
        self.inner.lock().expect("cache lock poisoned").get(&key).cloned()
    }

    pub fn insert(&self, key: Collection, value: Value) {
        self.inner.lock().expect("cache lock poisoned").insert(key, value);
    }

    /// Drop one entry; the next read re-loads from disk.
    pub fn invalidate(&self, key: Collection) {
        self.inner.lock().expect("cache lock poisoned").remove(&key);
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        self.inner.lock().expect("cache lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_get_invalidate() {
        let cache = CollectionCache::new();
        assert!(cache.get(Collection::Users).is_none());

        cache.insert(Collection::Users, json!([{"id": "u1"}]));
        assert_eq!(cache.get(Collection::Users), Some(json!([{"id": "u1"}])));

        cache.invalidate(Collection::Users);
        assert!(cache.get(Collection::Users).is_none());
    }

    #[test]
    fn test_invalidate_is_per_collection() {
        let cache = CollectionCache::new();
        cache.insert(Collection::Users, json!([]));
        cache.insert(Collection::Chat, json!([]));

        cache.invalidate(Collection::Users);
        assert!(cache.get(Collection::Users).is_none());
        assert!(cache.get(Collection::Chat).is_some());

        cache.invalidate_all();
        assert!(cache.get(Collection::Chat).is_none());
    }

    #[test]
    fn test_clone_shares_state() {
        let cache = CollectionCache::new();
        let handle = cache.clone();
        cache.insert(Collection::Settings, json!({}));
        handle.invalidate(Collection::Settings);
        assert!(cache.get(Collection::Settings).is_none());
    }
}
