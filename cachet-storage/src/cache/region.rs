//! Named cache regions.
//!
//! A [`Cache`] wraps an external [`CacheStore`] and adds what the store does
//! not know about: expiry, statistics, listener events, management beans and
//! outbound cluster invalidation. Each public entry operation is one unit of
//! work with its own [`EventDispatcher`]; events raised during the call are
//! delivered once, when the call ends.

use super::statistics::{CacheStatistics, StatisticsSnapshot};
use super::traits::{CacheKeyType, CacheStore, CacheValueType, StoredEntry};
use crate::invalidation::{InvalidationMessage, InvalidationPublisher};
use crate::management::{BeanKind, BeanSnapshot, ManagementRegistrar, ManagerIdentity, SnapshotProvider};
use cachet_core::{
    CacheConfiguration, CacheEntryKey, CacheEvent, CacheLocation, CachetError, CachetResult,
    ExpiryPolicy, InvalidationError, StateError, TypeDescriptor,
};
use cachet_events::{EventDispatcher, ListenerRegistration, RegistrationId};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Type-erased view of a cache, as held by its manager.
pub trait ManagedCache: Send + Sync {
    fn name(&self) -> &str;

    fn location(&self) -> &CacheLocation;

    /// The manager the cache belongs to.
    fn manager(&self) -> &ManagerIdentity;

    fn configuration(&self) -> CacheConfiguration;

    /// Actual key type of the cache, whether or not the configuration declares one.
    fn key_type(&self) -> TypeDescriptor;

    fn value_type(&self) -> TypeDescriptor;

    fn len(&self) -> CachetResult<usize>;

    fn is_empty(&self) -> CachetResult<bool>;

    fn clear(&self) -> CachetResult<()>;

    fn evict_expired(&self) -> CachetResult<usize>;

    fn statistics(&self) -> StatisticsSnapshot;

    fn enable_management(&self, enabled: bool) -> CachetResult<()>;

    fn enable_statistics(&self, enabled: bool) -> CachetResult<()>;

    fn set_invalidation_publisher(&self, publisher: Option<Arc<dyn InvalidationPublisher>>);

    /// Drop one entry on behalf of another node. Never publishes, never
    /// raises events. Returns whether an entry was present.
    fn receive_invalidate(&self, key: &CacheEntryKey) -> CachetResult<bool>;

    /// Record a region's update timestamp on behalf of another node. Never
    /// publishes, never raises events.
    fn receive_timestamp_invalidate(&self, region: &str, timestamp: i64) -> CachetResult<()>;

    fn close(&self) -> CachetResult<()>;

    fn is_closed(&self) -> bool;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A named, typed cache bound to one manager.
pub struct Cache<K, V> {
    name: Arc<str>,
    manager: ManagerIdentity,
    config: Arc<RwLock<CacheConfiguration>>,
    store: Arc<dyn CacheStore<K, V>>,
    registrations: RwLock<Vec<ListenerRegistration<K, V>>>,
    statistics: Arc<CacheStatistics>,
    registrar: ManagementRegistrar,
    publisher: RwLock<Option<Arc<dyn InvalidationPublisher>>>,
    closed: AtomicBool,
}

impl<K, V> Cache<K, V>
where
    K: CacheKeyType,
    V: CacheValueType,
{
    pub(crate) fn new(
        name: &str,
        manager: ManagerIdentity,
        config: CacheConfiguration,
        store: Arc<dyn CacheStore<K, V>>,
        registrar: ManagementRegistrar,
    ) -> Self {
        let statistics = Arc::new(CacheStatistics::new(config.statistics_enabled));
        Self {
            name: Arc::from(name),
            manager,
            config: Arc::new(RwLock::new(config)),
            store,
            registrations: RwLock::new(Vec::new()),
            statistics,
            registrar,
            publisher: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Register the beans the configuration asks for.
    pub(crate) fn register_beans(&self) -> CachetResult<()> {
        let config = self.configuration();
        if config.management_enabled {
            self.registrar.register(
                &self.manager,
                &self.name,
                BeanKind::Configuration,
                self.configuration_bean(),
            )?;
        }
        if config.statistics_enabled {
            self.registrar
                .register(&self.manager, &self.name, BeanKind::Statistics, self.statistics_bean())?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &CacheLocation {
        self.manager.location()
    }

    pub fn manager(&self) -> &ManagerIdentity {
        &self.manager
    }

    pub fn configuration(&self) -> CacheConfiguration {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    pub fn register_listener(&self, registration: ListenerRegistration<K, V>) -> CachetResult<RegistrationId> {
        self.ensure_open()?;
        let id = registration.id();
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration);
        debug!(cache = %self.name, registration = %id, "Registered cache entry listener");
        Ok(id)
    }

    /// Returns whether a registration with that id existed.
    pub fn deregister_listener(&self, id: RegistrationId) -> bool {
        let mut registrations = self.registrations.write().unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|registration| registration.id() != id);
        before != registrations.len()
    }

    pub fn listener_count(&self) -> usize {
        self.registrations.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn set_invalidation_publisher(&self, publisher: Option<Arc<dyn InvalidationPublisher>>) {
        *self.publisher.write().unwrap_or_else(PoisonError::into_inner) = publisher;
    }

    // ------------------------------------------------------------------------
    // Entry operations
    // ------------------------------------------------------------------------

    pub fn get(&self, key: &K) -> CachetResult<Option<V>> {
        self.unit_of_work(|dispatcher| self.read_entry(key, dispatcher))
    }

    /// Whether a live entry exists. Does not touch statistics or expiry.
    pub fn contains_key(&self, key: &K) -> CachetResult<bool> {
        self.ensure_open()?;
        let now = Instant::now();
        Ok(self
            .store
            .get(key)?
            .is_some_and(|entry| !entry.is_expired_at(now)))
    }

    pub fn put(&self, key: K, value: V) -> CachetResult<()> {
        self.unit_of_work(|dispatcher| self.write_entry(key, value, dispatcher))
    }

    pub fn put_all<I>(&self, entries: I) -> CachetResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.unit_of_work(|dispatcher| {
            for (key, value) in entries {
                self.write_entry(key, value, dispatcher)?;
            }
            Ok(())
        })
    }

    /// Returns whether a live entry was removed.
    pub fn remove(&self, key: &K) -> CachetResult<bool> {
        self.unit_of_work(|dispatcher| self.remove_entry(key, dispatcher))
    }

    /// Returns the number of live entries removed.
    pub fn remove_all<'a, I>(&self, keys: I) -> CachetResult<usize>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        self.unit_of_work(|dispatcher| {
            let mut removed = 0;
            for key in keys {
                if self.remove_entry(key, dispatcher)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    /// Drop every entry without raising events.
    pub fn clear(&self) -> CachetResult<()> {
        self.ensure_open()?;
        let keys = self.store.keys()?;
        self.store.clear()?;
        for key in &keys {
            self.publish(key, None);
        }
        debug!(cache = %self.name, entries = keys.len(), "Cleared cache");
        Ok(())
    }

    /// Remove every expired entry, raising one expired event each.
    pub fn evict_expired(&self) -> CachetResult<usize> {
        self.unit_of_work(|dispatcher| {
            let now = Instant::now();
            let mut evicted = 0;
            for key in self.store.keys()? {
                if self.expire(key, now, dispatcher)? {
                    evicted += 1;
                }
            }
            Ok(evicted)
        })
    }

    pub fn len(&self) -> CachetResult<usize> {
        self.ensure_open()?;
        self.store.len()
    }

    pub fn is_empty(&self) -> CachetResult<bool> {
        Ok(self.len()? == 0)
    }

    // ------------------------------------------------------------------------
    // Management
    // ------------------------------------------------------------------------

    pub fn enable_management(&self, enabled: bool) -> CachetResult<()> {
        self.ensure_open()?;
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .management_enabled = enabled;
        if enabled {
            self.registrar.register(
                &self.manager,
                &self.name,
                BeanKind::Configuration,
                self.configuration_bean(),
            )
        } else {
            self.registrar
                .unregister(&self.manager, &self.name, BeanKind::Configuration)
        }
    }

    pub fn enable_statistics(&self, enabled: bool) -> CachetResult<()> {
        self.ensure_open()?;
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .statistics_enabled = enabled;
        self.statistics.set_enabled(enabled);
        if enabled {
            self.registrar
                .register(&self.manager, &self.name, BeanKind::Statistics, self.statistics_bean())
        } else {
            self.registrar
                .unregister(&self.manager, &self.name, BeanKind::Statistics)
        }
    }

    // ------------------------------------------------------------------------
    // Inbound invalidation
    // ------------------------------------------------------------------------

    pub fn receive_invalidate(&self, key: &CacheEntryKey) -> CachetResult<bool> {
        self.ensure_open()?;
        let typed = K::from_entry_key(key).ok_or_else(|| self.unsupported_key(key))?;
        let removed = self.store.remove(&typed)?.is_some();
        trace!(cache = %self.name, key = %key, removed, "Received invalidation");
        Ok(removed)
    }

    pub fn receive_timestamp_invalidate(&self, region: &str, timestamp: i64) -> CachetResult<()> {
        self.ensure_open()?;
        let entry_key = CacheEntryKey::Region(region.to_string());
        let key = K::from_entry_key(&entry_key).ok_or_else(|| self.unsupported_key(&entry_key))?;
        let value = V::from_timestamp(timestamp).ok_or_else(|| {
            CachetError::from(InvalidationError::UnsupportedValue {
                cache: self.name.to_string(),
            })
        })?;
        let entry = StoredEntry::new(value, deadline(self.expiry(), Instant::now()));
        self.store.put(key, entry)?;
        trace!(cache = %self.name, region = %region, timestamp, "Received timestamp invalidation");
        Ok(())
    }

    /// Close the cache and its store, unregistering its beans. Idempotent.
    pub fn close(&self) -> CachetResult<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut outcome = Ok(());
        for kind in [BeanKind::Configuration, BeanKind::Statistics] {
            if let Err(err) = self.registrar.unregister(&self.manager, &self.name, kind) {
                outcome = outcome.and(Err(err));
            }
        }
        self.registrations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.set_invalidation_publisher(None);

        let closed = self.store.close();
        debug!(manager = %self.manager, cache = %self.name, "Cache closed");
        outcome.and(closed)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn ensure_open(&self) -> CachetResult<()> {
        if self.is_closed() {
            return Err(StateError::CacheClosed {
                name: self.name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn expiry(&self) -> ExpiryPolicy {
        self.config.read().unwrap_or_else(PoisonError::into_inner).expiry
    }

    /// Run `work` with a fresh dispatcher and deliver whatever it queued,
    /// even when it fails part way.
    fn unit_of_work<T>(&self, work: impl FnOnce(&EventDispatcher<K, V>) -> CachetResult<T>) -> CachetResult<T> {
        self.ensure_open()?;
        let dispatcher = EventDispatcher::new();
        let result = work(&dispatcher);
        if !dispatcher.is_empty() {
            let registrations = self
                .registrations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let batches = dispatcher.dispatch(&registrations);
            trace!(cache = %self.name, batches, "Dispatched unit of work");
        }
        result
    }

    fn read_entry(&self, key: &K, dispatcher: &EventDispatcher<K, V>) -> CachetResult<Option<V>> {
        let Some(entry) = self.store.get(key)? else {
            self.statistics.record_miss();
            return Ok(None);
        };

        let now = Instant::now();
        if entry.is_expired_at(now) {
            self.expire(key.clone(), now, dispatcher)?;
            self.statistics.record_miss();
            return Ok(None);
        }

        let expiry = self.expiry();
        if expiry.refreshes_on_access() {
            // An entry invalidated since the read stays gone.
            self.store.refresh(key, deadline(expiry, now))?;
        }
        self.statistics.record_hit();
        Ok(Some(entry.value))
    }

    fn write_entry(&self, key: K, value: V, dispatcher: &EventDispatcher<K, V>) -> CachetResult<()> {
        let now = Instant::now();
        let entry = StoredEntry::new(value.clone(), deadline(self.expiry(), now));
        let previous = self.store.put(key.clone(), entry)?;
        self.statistics.record_put();
        self.publish(&key, Some(&value));

        let event = match previous {
            Some(previous) if !previous.is_expired_at(now) => {
                CacheEvent::updated(Arc::clone(&self.name), key, value, previous.value)
            }
            Some(previous) => {
                self.statistics.record_evictions(1);
                dispatcher.push(CacheEvent::expired(
                    Arc::clone(&self.name),
                    key.clone(),
                    previous.value,
                ));
                CacheEvent::created(Arc::clone(&self.name), key, value)
            }
            None => CacheEvent::created(Arc::clone(&self.name), key, value),
        };
        dispatcher.push(event);
        Ok(())
    }

    fn remove_entry(&self, key: &K, dispatcher: &EventDispatcher<K, V>) -> CachetResult<bool> {
        let Some(previous) = self.store.remove(key)? else {
            return Ok(false);
        };
        self.publish(key, None);

        if previous.is_expired_at(Instant::now()) {
            self.statistics.record_evictions(1);
            dispatcher.push(CacheEvent::expired(Arc::clone(&self.name), key.clone(), previous.value));
            return Ok(false);
        }

        self.statistics.record_removal();
        dispatcher.push(CacheEvent::removed(Arc::clone(&self.name), key.clone(), previous.value));
        Ok(true)
    }

    /// Drop `key` if it is still expired at `now`. Returns whether this call
    /// removed it.
    fn expire(&self, key: K, now: Instant, dispatcher: &EventDispatcher<K, V>) -> CachetResult<bool> {
        let Some(entry) = self.store.remove_if_expired(&key, now)? else {
            return Ok(false);
        };
        self.statistics.record_evictions(1);
        dispatcher.push(CacheEvent::expired(Arc::clone(&self.name), key, entry.value));
        Ok(true)
    }

    /// Tell the cluster a local write made `key` stale elsewhere.
    fn publish(&self, key: &K, value: Option<&V>) {
        let publisher = self
            .publisher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(publisher) = publisher else {
            return;
        };
        let Some(entry_key) = key.to_entry_key() else {
            return;
        };

        let message = match entry_key {
            CacheEntryKey::Composite(key) => InvalidationMessage::for_key(&self.name, &key),
            CacheEntryKey::Region(region) => match value.and_then(|value| value.as_timestamp()) {
                Some(timestamp) => Ok(InvalidationMessage::for_timestamp(&self.name, region, timestamp)),
                None => return,
            },
            CacheEntryKey::NaturalId(_) => {
                trace!(cache = %self.name, "Natural-id entries are not published");
                return;
            }
        };

        let outcome = message
            .map_err(CachetError::from)
            .and_then(|message| publisher.publish(&message));
        if let Err(err) = outcome {
            warn!(cache = %self.name, error = %err, "Failed to publish invalidation");
        }
    }

    fn unsupported_key(&self, key: &CacheEntryKey) -> CachetError {
        InvalidationError::UnsupportedKey {
            cache: self.name.to_string(),
            shape: key.shape().to_string(),
        }
        .into()
    }

    fn configuration_bean(&self) -> Arc<dyn SnapshotProvider> {
        let config = Arc::clone(&self.config);
        Arc::new(move || {
            BeanSnapshot::Configuration(config.read().unwrap_or_else(PoisonError::into_inner).snapshot())
        })
    }

    fn statistics_bean(&self) -> Arc<dyn SnapshotProvider> {
        let statistics = Arc::clone(&self.statistics);
        Arc::new(move || BeanSnapshot::Statistics(statistics.snapshot()))
    }
}

fn deadline(expiry: ExpiryPolicy, now: Instant) -> Option<Instant> {
    expiry.ttl().and_then(|ttl| now.checked_add(ttl))
}

impl<K, V> ManagedCache for Cache<K, V>
where
    K: CacheKeyType,
    V: CacheValueType,
{
    fn name(&self) -> &str {
        Cache::name(self)
    }

    fn location(&self) -> &CacheLocation {
        Cache::location(self)
    }

    fn manager(&self) -> &ManagerIdentity {
        Cache::manager(self)
    }

    fn configuration(&self) -> CacheConfiguration {
        Cache::configuration(self)
    }

    fn key_type(&self) -> TypeDescriptor {
        TypeDescriptor::of::<K>()
    }

    fn value_type(&self) -> TypeDescriptor {
        TypeDescriptor::of::<V>()
    }

    fn len(&self) -> CachetResult<usize> {
        Cache::len(self)
    }

    fn is_empty(&self) -> CachetResult<bool> {
        Cache::is_empty(self)
    }

    fn clear(&self) -> CachetResult<()> {
        Cache::clear(self)
    }

    fn evict_expired(&self) -> CachetResult<usize> {
        Cache::evict_expired(self)
    }

    fn statistics(&self) -> StatisticsSnapshot {
        Cache::statistics(self)
    }

    fn enable_management(&self, enabled: bool) -> CachetResult<()> {
        Cache::enable_management(self, enabled)
    }

    fn enable_statistics(&self, enabled: bool) -> CachetResult<()> {
        Cache::enable_statistics(self, enabled)
    }

    fn set_invalidation_publisher(&self, publisher: Option<Arc<dyn InvalidationPublisher>>) {
        Cache::set_invalidation_publisher(self, publisher)
    }

    fn receive_invalidate(&self, key: &CacheEntryKey) -> CachetResult<bool> {
        Cache::receive_invalidate(self, key)
    }

    fn receive_timestamp_invalidate(&self, region: &str, timestamp: i64) -> CachetResult<()> {
        Cache::receive_timestamp_invalidate(self, region, timestamp)
    }

    fn close(&self) -> CachetResult<()> {
        Cache::close(self)
    }

    fn is_closed(&self) -> bool {
        Cache::is_closed(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl fmt::Debug for dyn ManagedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCache")
            .field("name", &self.name())
            .field("location", self.location())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.name)
            .field("manager", &self.manager)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
