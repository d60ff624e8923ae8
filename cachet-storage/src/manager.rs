//! Named registry of caches for one `(scope, location)` pair.

use crate::cache::{Cache, CacheKeyType, CacheStore, CacheValueType, InMemoryStore, ManagedCache};
use crate::invalidation::InvalidationPublisher;
use crate::management::{ManagementRegistrar, ManagerIdentity};
use crate::provider::CachingProvider;
use cachet_core::{
    CacheConfiguration, CacheLocation, CachetResult, ConfigError, Properties, ProviderConfig,
    ScopeHandle, ScopeId, StateError, TypeDescriptor, WeakScope,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, info, warn};

type CacheMap = HashMap<String, Arc<dyn ManagedCache>>;

/// Owns the caches created through it until it is closed.
pub struct CacheManager {
    provider: Weak<CachingProvider>,
    location: CacheLocation,
    scope: WeakScope,
    properties: Properties,
    defaults: ProviderConfig,
    registrar: ManagementRegistrar,
    publisher: RwLock<Option<Arc<dyn InvalidationPublisher>>>,
    caches: RwLock<CacheMap>,
    closed: AtomicBool,
}

impl CacheManager {
    pub(crate) fn new(
        provider: Weak<CachingProvider>,
        location: CacheLocation,
        scope: &ScopeHandle,
        properties: Properties,
        defaults: ProviderConfig,
        registrar: ManagementRegistrar,
    ) -> Self {
        Self {
            provider,
            location,
            scope: scope.downgrade(),
            properties,
            defaults,
            registrar,
            publisher: RwLock::new(None),
            caches: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn location(&self) -> &CacheLocation {
        &self.location
    }

    /// The `(scope, location)` pair this manager is registered under.
    pub fn identity(&self) -> ManagerIdentity {
        ManagerIdentity::new(self.scope.id(), self.location.clone())
    }

    /// The isolation scope, `None` once it has been released.
    pub fn scope(&self) -> Option<ScopeHandle> {
        self.scope.upgrade()
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope.id()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The owning provider, `None` once it has been dropped.
    pub fn provider(&self) -> Option<Arc<CachingProvider>> {
        self.provider.upgrade()
    }

    pub fn registrar(&self) -> &ManagementRegistrar {
        &self.registrar
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // Cache lifecycle
    // ------------------------------------------------------------------------

    /// Create a cache backed by an [`InMemoryStore`].
    pub fn create_cache<K, V>(&self, name: &str, config: CacheConfiguration) -> CachetResult<Arc<Cache<K, V>>>
    where
        K: CacheKeyType,
        V: CacheValueType,
    {
        self.create_cache_with_store(name, config, Arc::new(InMemoryStore::new(name)))
    }

    /// Create a cache wrapping an externally supplied store.
    ///
    /// Fails if the name is already registered; the existing cache is left
    /// untouched.
    pub fn create_cache_with_store<K, V>(
        &self,
        name: &str,
        config: CacheConfiguration,
        store: Arc<dyn CacheStore<K, V>>,
    ) -> CachetResult<Arc<Cache<K, V>>>
    where
        K: CacheKeyType,
        V: CacheValueType,
    {
        if name.is_empty() {
            return Err(ConfigError::EmptyName {
                what: "cache".to_string(),
            }
            .into());
        }
        config.validate()?;
        check_declared("key", config.key_type, TypeDescriptor::of::<K>())?;
        check_declared("value", config.value_type, TypeDescriptor::of::<V>())?;
        let config = self.defaults.apply_to(config);

        let mut caches = self.write_caches();
        self.ensure_open()?;
        if caches.contains_key(name) {
            return Err(ConfigError::DuplicateCache {
                name: name.to_string(),
            }
            .into());
        }

        let cache = Arc::new(Cache::new(
            name,
            self.identity(),
            config,
            store,
            self.registrar.clone(),
        ));
        cache.set_invalidation_publisher(self.current_publisher());
        cache.register_beans()?;
        caches.insert(name.to_string(), cache.clone());

        info!(location = %self.location, cache = %name, "Created cache");
        Ok(cache)
    }

    /// Look up a cache. An unknown name is `Ok(None)`.
    pub fn get_cache(&self, name: &str) -> CachetResult<Option<Arc<dyn ManagedCache>>> {
        self.ensure_open()?;
        Ok(self.read_caches().get(name).cloned())
    }

    /// Look up a cache with its key and value types.
    ///
    /// Fails when the configured types are declared and differ from the
    /// requested ones, or when the cache holds other types.
    pub fn get_typed_cache<K, V>(&self, name: &str) -> CachetResult<Option<Arc<Cache<K, V>>>>
    where
        K: CacheKeyType,
        V: CacheValueType,
    {
        let Some(cache) = self.get_cache(name)? else {
            return Ok(None);
        };

        let config = cache.configuration();
        check_requested("key", TypeDescriptor::of::<K>(), config.key_type)?;
        check_requested("value", TypeDescriptor::of::<V>(), config.value_type)?;

        let (key_type, value_type) = (cache.key_type(), cache.value_type());
        match cache.into_any().downcast::<Cache<K, V>>() {
            Ok(typed) => Ok(Some(typed)),
            Err(_) => Err(ConfigError::TypeMismatch {
                what: "cache".to_string(),
                requested: format!("{}/{}", TypeDescriptor::of::<K>(), TypeDescriptor::of::<V>()),
                configured: format!("{}/{}", key_type, value_type),
            }
            .into()),
        }
    }

    /// Remove and close a cache. Unknown names are ignored.
    pub fn destroy_cache(&self, name: &str) -> CachetResult<()> {
        self.ensure_open()?;
        let removed = self.write_caches().remove(name);
        if let Some(cache) = removed {
            cache.close()?;
            info!(location = %self.location, cache = %name, "Destroyed cache");
        }
        Ok(())
    }

    /// Detach a cache without closing it, handing it to the caller.
    pub fn remove_cache(&self, name: &str) -> CachetResult<Option<Arc<dyn ManagedCache>>> {
        self.ensure_open()?;
        let removed = self.write_caches().remove(name);
        if removed.is_some() {
            debug!(location = %self.location, cache = %name, "Detached cache");
        }
        Ok(removed)
    }

    /// Registered cache names, sorted.
    pub fn cache_names(&self) -> CachetResult<Vec<String>> {
        self.ensure_open()?;
        let mut names: Vec<String> = self.read_caches().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn enable_management(&self, name: &str, enabled: bool) -> CachetResult<()> {
        match self.get_cache(name)? {
            Some(cache) => cache.enable_management(enabled),
            None => {
                debug!(location = %self.location, cache = %name, "No cache to toggle management on");
                Ok(())
            }
        }
    }

    pub fn enable_statistics(&self, name: &str, enabled: bool) -> CachetResult<()> {
        match self.get_cache(name)? {
            Some(cache) => cache.enable_statistics(enabled),
            None => {
                debug!(location = %self.location, cache = %name, "No cache to toggle statistics on");
                Ok(())
            }
        }
    }

    /// Route outbound invalidation of every current and future cache here.
    pub fn set_invalidation_publisher(&self, publisher: Option<Arc<dyn InvalidationPublisher>>) {
        *self.publisher.write().unwrap_or_else(PoisonError::into_inner) = publisher.clone();
        for cache in self.read_caches().values() {
            cache.set_invalidation_publisher(publisher.clone());
        }
    }

    /// Close the manager and every cache it owns. Idempotent.
    ///
    /// The manager leaves the provider registry before any cache is closed.
    /// A cache that fails to close is logged and skipped.
    pub fn close(&self) {
        if !self.mark_closed() {
            return;
        }

        if let Some(provider) = self.provider.upgrade() {
            provider.remove(self);
        }

        let caches: Vec<(String, Arc<dyn ManagedCache>)> = self.write_caches().drain().collect();
        for (name, cache) in &caches {
            if let Err(err) = cache.close() {
                warn!(location = %self.location, cache = %name, error = %err, "Failed to close cache");
            }
        }

        info!(location = %self.location, scope = %self.scope.id(), caches = caches.len(), "CacheManager closed");
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Flip the closed flag. Only the first caller gets `true`.
    pub(crate) fn mark_closed(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn ensure_open(&self) -> CachetResult<()> {
        if self.is_closed() {
            return Err(StateError::ManagerClosed {
                location: self.location.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn current_publisher(&self) -> Option<Arc<dyn InvalidationPublisher>> {
        self.publisher.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn read_caches(&self) -> RwLockReadGuard<'_, CacheMap> {
        self.caches.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_caches(&self) -> RwLockWriteGuard<'_, CacheMap> {
        self.caches.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("location", &self.location)
            .field("scope", &self.scope.id())
            .field("caches", &self.read_caches().len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A configuration declaring types must match the cache's actual types.
fn check_declared(what: &str, declared: Option<TypeDescriptor>, actual: TypeDescriptor) -> CachetResult<()> {
    match declared {
        Some(declared) if declared != actual => Err(ConfigError::TypeMismatch {
            what: what.to_string(),
            requested: actual.to_string(),
            configured: declared.to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// A lookup must match the configured types when they are declared.
fn check_requested(what: &str, requested: TypeDescriptor, configured: Option<TypeDescriptor>) -> CachetResult<()> {
    match configured {
        Some(configured) if configured != requested => Err(ConfigError::TypeMismatch {
            what: what.to_string(),
            requested: requested.to_string(),
            configured: configured.to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}
