//! cachet Test Utilities
//!
//! Centralized test infrastructure for the cachet workspace:
//! - Proptest generators for identifiers, keys and names
//! - Recording listeners and publishers for observing caches
//! - Test fixtures for common scenarios
//! - Custom assertions for cachet error categories

// Re-export core types for convenience
pub use cachet_core::{
    CacheConfiguration, CacheEntryKey, CacheEvent, CacheKey, CacheKeyFactory, CacheLocation,
    CachetError, CachetResult, ConfigError, EventKind, ExpiryPolicy, IdentifierValue,
    InvalidationError, KeyShapeError, ListenerCapabilities, ProviderConfig, ScopeHandle,
    StateError, StoreError, StructuralIdHasher,
};
pub use cachet_events::{CacheEntryListener, EventBatch, ListenerRegistration};
pub use cachet_storage::{
    CacheManager, CacheStore, CacheValueType, CachingProvider, InvalidationMessage,
    InvalidationPublisher, InvalidationReceiver, StoredEntry,
};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly fmt subscriber. Safe to call from every test.
///
/// Honors `RUST_LOG`; defaults to debug output for the cachet crates.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cachet_storage=debug,cachet_events=debug,warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// DOMAIN VALUES
// ============================================================================

/// Cached entity used across the test suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub genre: String,
}

impl Book {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            genre: "fiction".to_string(),
        }
    }
}

impl CacheValueType for Book {}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating cachet key material.

    use super::*;
    use proptest::prelude::*;

    /// Generate a scalar identifier.
    pub fn arb_scalar_identifier() -> impl Strategy<Value = IdentifierValue> {
        prop_oneof![
            any::<i64>().prop_map(IdentifierValue::Int),
            "[a-z0-9-]{1,16}".prop_map(IdentifierValue::Text),
            any::<bool>().prop_map(IdentifierValue::Bool),
            any::<[u8; 16]>().prop_map(|bytes| IdentifierValue::Uuid(uuid_from(bytes))),
        ]
    }

    /// Generate a scalar or composite (array-shaped) identifier.
    pub fn arb_identifier() -> impl Strategy<Value = IdentifierValue> {
        prop_oneof![
            3 => arb_scalar_identifier(),
            1 => prop::collection::vec(arb_scalar_identifier(), 1..4).prop_map(IdentifierValue::Array),
        ]
    }

    /// Generate an entity type or collection-role name.
    pub fn arb_owner_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{2,10}(\\.[a-z]{2,8})?"
    }

    /// Generate an optional tenant identifier.
    pub fn arb_tenant() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[a-z]{1,12}")
    }

    /// Generate a cache name, including separators bean names must escape.
    pub fn arb_cache_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9:=,.-]{0,20}"
    }

    /// Generate a manager location.
    pub fn arb_location() -> impl Strategy<Value = CacheLocation> {
        "[a-z]{1,8}(://[a-z]{1,8}(:[0-9]{2,4})?)?".prop_map(CacheLocation::new)
    }

    fn uuid_from(bytes: [u8; 16]) -> uuid::Uuid {
        uuid::Uuid::from_bytes(bytes)
    }
}

// ============================================================================
// RECORDERS
// ============================================================================

/// Listener recording every batch it receives.
pub struct RecordingListener<K, V> {
    batches: Mutex<Vec<(EventKind, Vec<CacheEvent<K, V>>)>>,
}

impl<K, V> RecordingListener<K, V> {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, kind: EventKind, events: EventBatch<K, V>) {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, events.collect()));
    }
}

impl<K: Clone, V: Clone> RecordingListener<K, V> {
    /// Every batch, in delivery order.
    pub fn batches(&self) -> Vec<(EventKind, Vec<CacheEvent<K, V>>)> {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The kind of every batch, in delivery order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.batches().into_iter().map(|(kind, _)| kind).collect()
    }

    /// All events of one kind, flattened across batches.
    pub fn events_of(&self, kind: EventKind) -> Vec<CacheEvent<K, V>> {
        self.batches()
            .into_iter()
            .filter(|(batch_kind, _)| *batch_kind == kind)
            .flat_map(|(_, events)| events)
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<K, V> Default for RecordingListener<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Send + Sync, V: Send + Sync> CacheEntryListener<K, V> for RecordingListener<K, V> {
    fn on_created(&self, events: EventBatch<K, V>) {
        self.record(EventKind::Created, events);
    }

    fn on_updated(&self, events: EventBatch<K, V>) {
        self.record(EventKind::Updated, events);
    }

    fn on_removed(&self, events: EventBatch<K, V>) {
        self.record(EventKind::Removed, events);
    }

    fn on_expired(&self, events: EventBatch<K, V>) {
        self.record(EventKind::Expired, events);
    }
}

/// Publisher recording every outbound message.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<InvalidationMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<InvalidationMessage> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InvalidationPublisher for RecordingPublisher {
    fn publish(&self, message: &InvalidationMessage) -> CachetResult<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}

/// Publisher delivering every message straight to another node's receiver,
/// as a reliable cluster channel would.
#[derive(Debug, Default)]
pub struct ForwardingPublisher {
    target: OnceCell<InvalidationReceiver>,
    forwarded: AtomicUsize,
}

impl ForwardingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect the channel. Only the first call has an effect.
    pub fn connect(&self, receiver: InvalidationReceiver) {
        let _ = self.target.set(receiver);
    }

    pub fn forwarded(&self) -> usize {
        self.forwarded.load(Ordering::SeqCst)
    }
}

impl InvalidationPublisher for ForwardingPublisher {
    fn publish(&self, message: &InvalidationMessage) -> CachetResult<()> {
        self.forwarded.fetch_add(1, Ordering::SeqCst);
        match self.target.get() {
            Some(receiver) => {
                let json = message.to_json()?;
                receiver.apply_json(&json).map(|_| ())
            }
            None => Ok(()),
        }
    }
}

/// Store whose close always fails; every other operation works in memory.
pub struct FailingCloseStore<K, V> {
    entries: RwLock<HashMap<K, StoredEntry<V>>>,
    close_attempts: AtomicUsize,
}

impl<K, V> FailingCloseStore<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            close_attempts: AtomicUsize::new(0),
        }
    }

    pub fn close_attempts(&self) -> usize {
        self.close_attempts.load(Ordering::SeqCst)
    }
}

impl<K, V> Default for FailingCloseStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> CacheStore<K, V> for FailingCloseStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned())
    }

    fn put(&self, key: K, entry: StoredEntry<V>) -> CachetResult<Option<StoredEntry<V>>> {
        Ok(self.entries.write().unwrap_or_else(|e| e.into_inner()).insert(key, entry))
    }

    fn remove(&self, key: &K) -> CachetResult<Option<StoredEntry<V>>> {
        Ok(self.entries.write().unwrap_or_else(|e| e.into_inner()).remove(key))
    }

    fn refresh(&self, key: &K, expires_at: Option<Instant>) -> CachetResult<bool> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .get_mut(key)
            .map(|entry| entry.expires_at = expires_at)
            .is_some())
    }

    fn remove_if_expired(&self, key: &K, now: Instant) -> CachetResult<Option<StoredEntry<V>>> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
            return Ok(entries.remove(key));
        }
        Ok(None)
    }

    fn keys(&self) -> CachetResult<Vec<K>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }

    fn len(&self) -> CachetResult<usize> {
        Ok(self.entries.read().unwrap_or_else(|e| e.into_inner()).len())
    }

    fn clear(&self) -> CachetResult<()> {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }

    fn close(&self) -> CachetResult<()> {
        self.close_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend {
            cache: "failing".to_string(),
            operation: "close".to_string(),
            reason: "backend unavailable".to_string(),
        }
        .into())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    const FACTORY: CacheKeyFactory = CacheKeyFactory::new();

    /// Entity key for a `Book` with an integer id.
    pub fn book_key(id: i64, tenant: Option<&str>) -> CacheKey {
        FACTORY.build_entity_key(&IdentifierValue::Int(id), &StructuralIdHasher, "Book", tenant)
    }

    /// Collection key for the `Book.authors` role.
    pub fn authors_key(book_id: i64) -> CacheKey {
        FACTORY.build_collection_key(&IdentifierValue::Int(book_id), &StructuralIdHasher, "Book.authors", None)
    }

    /// Provider with default configuration.
    pub fn provider() -> Arc<CachingProvider> {
        CachingProvider::new()
    }

    /// Manager at location `demo` in a fresh scope, with the scope handle
    /// that keeps it alive.
    pub fn demo_manager(provider: &CachingProvider) -> (ScopeHandle, Arc<CacheManager>) {
        let scope = ScopeHandle::named("test");
        let manager = provider.get_cache_manager(Some(&CacheLocation::new("demo")), Some(&scope), None);
        (scope, manager)
    }

    /// Configuration of an entity cache keyed by `CacheKey`.
    pub fn books_config() -> CacheConfiguration {
        CacheConfiguration::new().typed::<CacheKey, Book>()
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertions for cachet error categories.

    use super::*;

    pub fn assert_config_error<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(
            matches!(result, Err(CachetError::Config(_))),
            "Expected configuration error, got {:?}",
            result
        );
    }

    pub fn assert_duplicate_cache<T: std::fmt::Debug>(result: &CachetResult<T>, name: &str) {
        match result {
            Err(CachetError::Config(ConfigError::DuplicateCache { name: found })) => {
                assert_eq!(found, name, "Duplicate reported for the wrong cache");
            }
            other => panic!("Expected duplicate cache error for {}, got {:?}", name, other),
        }
    }

    pub fn assert_state_error<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(
            matches!(result, Err(CachetError::State(_))),
            "Expected state error, got {:?}",
            result
        );
    }

    pub fn assert_invalidation_error<T: std::fmt::Debug>(result: &CachetResult<T>) {
        assert!(
            matches!(result, Err(CachetError::Invalidation(_))),
            "Expected invalidation error, got {:?}",
            result
        );
    }
}
