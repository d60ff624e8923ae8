//! In-memory store used when no external store is supplied.

use super::traits::{CacheStore, StoredEntry};
use cachet_core::{CachetResult, StoreError};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Hash map store behind a read-write lock. Values are held by reference
/// semantics: what goes in is what comes out, no serialization.
#[derive(Debug)]
pub struct InMemoryStore<K, V> {
    name: String,
    entries: RwLock<HashMap<K, StoredEntry<V>>>,
    closed: AtomicBool,
}

impl<K, V> InMemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, operation: &str) -> CachetResult<()> {
        if self.is_closed() {
            return Err(StoreError::Backend {
                cache: self.name.clone(),
                operation: operation.to_string(),
                reason: "store is closed".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, StoredEntry<V>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, StoredEntry<V>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> CacheStore<K, V> for InMemoryStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>> {
        self.ensure_open("get")?;
        Ok(self.read().get(key).cloned())
    }

    fn put(&self, key: K, entry: StoredEntry<V>) -> CachetResult<Option<StoredEntry<V>>> {
        self.ensure_open("put")?;
        Ok(self.write().insert(key, entry))
    }

    fn remove(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>> {
        self.ensure_open("remove")?;
        Ok(self.write().remove(key))
    }

    fn refresh(&self, key: &K, expires_at: Option<Instant>) -> CachetResult<bool> {
        self.ensure_open("refresh")?;
        match self.write().get_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove_if_expired(&self, key: &K, now: Instant) -> CachetResult<Option<StoredEntry<V>>> {
        self.ensure_open("remove_if_expired")?;
        let mut entries = self.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            return Ok(entries.remove(key));
        }
        Ok(None)
    }

    fn keys(&self) -> CachetResult<Vec<K>> {
        self.ensure_open("keys")?;
        Ok(self.read().keys().cloned().collect())
    }

    fn len(&self) -> CachetResult<usize> {
        self.ensure_open("len")?;
        Ok(self.read().len())
    }

    fn clear(&self) -> CachetResult<()> {
        self.ensure_open("clear")?;
        self.write().clear();
        Ok(())
    }

    fn close(&self) -> CachetResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.write().clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let store = InMemoryStore::new("books");
        assert!(store.put("k", StoredEntry::new(1, None)).unwrap().is_none());
        let previous = store.put("k", StoredEntry::new(2, None)).unwrap();
        assert_eq!(previous.map(|e| e.value), Some(1));
        assert_eq!(store.get(&"k").unwrap().map(|e| e.value), Some(2));
        assert_eq!(store.len().unwrap(), 1);

        assert_eq!(store.remove(&"k").unwrap().map(|e| e.value), Some(2));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_conditional_writes_leave_absent_or_fresh_keys_alone() {
        let store = InMemoryStore::new("books");
        let now = Instant::now();
        assert!(!store.refresh(&"gone", None).unwrap());
        assert!(store.get(&"gone").unwrap().is_none());

        store.put("stale", StoredEntry::new(1, Some(now))).unwrap();
        store.put("fresh", StoredEntry::new(2, None)).unwrap();
        assert!(store.remove_if_expired(&"fresh", now).unwrap().is_none());
        assert_eq!(store.remove_if_expired(&"stale", now).unwrap().map(|e| e.value), Some(1));

        assert!(store.refresh(&"fresh", Some(now)).unwrap());
        assert_eq!(store.get(&"fresh").unwrap().and_then(|e| e.expires_at), Some(now));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_keys_and_clear() {
        let store = InMemoryStore::new("books");
        store.put(1, StoredEntry::new("a", None)).unwrap();
        store.put(2, StoredEntry::new("b", None)).unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);

        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store: InMemoryStore<u32, u32> = InMemoryStore::new("books");
        store.put(1, StoredEntry::new(1, None)).unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        let err = store.get(&1).expect_err("closed store");
        assert!(err.to_string().contains("store is closed"));
    }
}
