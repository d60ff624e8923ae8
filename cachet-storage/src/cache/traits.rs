//! External store seam and the key/value conversions caches rely on.
//!
//! A [`Cache`](super::Cache) never owns its entries directly; it wraps a
//! [`CacheStore`] supplied by the storage engine (or the bundled
//! [`InMemoryStore`](super::InMemoryStore)). Inbound cluster invalidation
//! arrives without type information, so keys and values convert from their
//! wire shapes through [`CacheKeyType`] and [`CacheValueType`].

use cachet_core::{CacheEntryKey, CacheKey, CachetResult, NaturalIdKey};
use std::hash::Hash;
use std::time::Instant;

/// A value as held by a store, with its expiry deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry<V> {
    pub value: V,
    /// `None` never expires.
    pub expires_at: Option<Instant>,
}

impl<V> StoredEntry<V> {
    pub fn new(value: V, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Storage backend a cache delegates to.
///
/// Implementations must be thread-safe. Every operation may fail with a
/// store error; the cache surfaces it to the caller unchanged.
pub trait CacheStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>>;

    /// Insert or replace, returning the previous entry.
    fn put(&self, key: K, entry: StoredEntry<V>) -> CachetResult<Option<StoredEntry<V>>>;

    fn remove(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>>;

    /// Move the deadline of the entry currently under `key`. Writes nothing
    /// and returns `false` when the key is absent.
    fn refresh(&self, key: &K, expires_at: Option<Instant>) -> CachetResult<bool>;

    /// Remove the entry under `key` only if it is still expired at `now`.
    /// A value written since the caller's read stays.
    fn remove_if_expired(&self, key: &K, now: Instant) -> CachetResult<Option<StoredEntry<V>>>;

    /// Snapshot of the keys currently held.
    fn keys(&self) -> CachetResult<Vec<K>>;

    fn len(&self) -> CachetResult<usize>;

    fn is_empty(&self) -> CachetResult<bool> {
        Ok(self.len()? == 0)
    }

    fn clear(&self) -> CachetResult<()>;

    /// Release the backing resources. Called once, when the owning cache closes.
    fn close(&self) -> CachetResult<()>;
}

/// Key types a cache can hold.
pub trait CacheKeyType: Clone + Eq + Hash + Send + Sync + 'static {
    /// Rebuild a key from its type-erased form. `None` when this key type
    /// cannot represent that shape.
    fn from_entry_key(key: &CacheEntryKey) -> Option<Self>;

    /// Type-erased form used for outbound invalidation.
    fn to_entry_key(&self) -> Option<CacheEntryKey>;
}

impl CacheKeyType for CacheEntryKey {
    fn from_entry_key(key: &CacheEntryKey) -> Option<Self> {
        Some(key.clone())
    }

    fn to_entry_key(&self) -> Option<CacheEntryKey> {
        Some(self.clone())
    }
}

impl CacheKeyType for CacheKey {
    fn from_entry_key(key: &CacheEntryKey) -> Option<Self> {
        match key {
            CacheEntryKey::Composite(key) => Some(key.clone()),
            _ => None,
        }
    }

    fn to_entry_key(&self) -> Option<CacheEntryKey> {
        Some(CacheEntryKey::Composite(self.clone()))
    }
}

impl CacheKeyType for NaturalIdKey {
    fn from_entry_key(key: &CacheEntryKey) -> Option<Self> {
        match key {
            CacheEntryKey::NaturalId(key) => Some(key.clone()),
            _ => None,
        }
    }

    fn to_entry_key(&self) -> Option<CacheEntryKey> {
        Some(CacheEntryKey::NaturalId(self.clone()))
    }
}

/// Timestamp regions are keyed by table space name.
impl CacheKeyType for String {
    fn from_entry_key(key: &CacheEntryKey) -> Option<Self> {
        match key {
            CacheEntryKey::Region(region) => Some(region.clone()),
            _ => None,
        }
    }

    fn to_entry_key(&self) -> Option<CacheEntryKey> {
        Some(CacheEntryKey::Region(self.clone()))
    }
}

/// Value types a cache can hold.
///
/// Only values that can stand for an update timestamp override the two
/// conversions; everything else keeps the defaults.
pub trait CacheValueType: Clone + Send + Sync + 'static {
    fn from_timestamp(_timestamp: i64) -> Option<Self> {
        None
    }

    fn as_timestamp(&self) -> Option<i64> {
        None
    }
}

impl CacheValueType for i64 {
    fn from_timestamp(timestamp: i64) -> Option<Self> {
        Some(timestamp)
    }

    fn as_timestamp(&self) -> Option<i64> {
        Some(*self)
    }
}

impl CacheValueType for String {}

impl CacheValueType for Vec<u8> {}

impl CacheValueType for serde_json::Value {
    fn from_timestamp(timestamp: i64) -> Option<Self> {
        Some(serde_json::Value::from(timestamp))
    }

    fn as_timestamp(&self) -> Option<i64> {
        self.as_i64()
    }
}
