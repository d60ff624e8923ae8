//! Process-wide registry of cache managers.
//!
//! Managers are memoized per `(scope, location)`. The registry holds scopes
//! weakly: a released scope's managers stay registered until they are closed
//! explicitly or [`CachingProvider::prune_released_scopes`] reclaims them.
//!
//! Lock discipline: the registry mutex is never held while a manager closes.
//! Closing a manager calls back into [`CachingProvider::remove`], which
//! takes the same mutex. That call only removes the entry if it still holds
//! the closing manager: a replacement registered after the manager marked
//! itself closed stays put.

use crate::management::ManagementRegistrar;
use crate::manager::CacheManager;
use cachet_core::{CacheLocation, Properties, ProviderConfig, ScopeHandle, ScopeId, WeakScope};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info};

/// Optional capabilities a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalFeature {
    /// Values are held as given rather than copied into the store.
    StoreByReference,
}

struct ScopeEntry {
    scope: WeakScope,
    managers: HashMap<CacheLocation, Arc<CacheManager>>,
}

/// Entry point: hands out cache managers and owns shutdown cascades.
pub struct CachingProvider {
    config: ProviderConfig,
    registrar: ManagementRegistrar,
    registry: Mutex<HashMap<ScopeId, ScopeEntry>>,
    self_ref: Weak<CachingProvider>,
}

impl CachingProvider {
    pub fn new() -> Arc<Self> {
        Self::with_config(ProviderConfig::default())
    }

    /// Provider configured from `CACHET_*` environment variables.
    pub fn from_env() -> Arc<Self> {
        Self::with_config(ProviderConfig::from_env())
    }

    pub fn with_config(config: ProviderConfig) -> Arc<Self> {
        Self::with_registrar(config, ManagementRegistrar::in_memory())
    }

    /// Provider publishing management beans through the given registrar.
    pub fn with_registrar(config: ProviderConfig, registrar: ManagementRegistrar) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            registrar,
            registry: Mutex::new(HashMap::new()),
            self_ref: self_ref.clone(),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn registrar(&self) -> &ManagementRegistrar {
        &self.registrar
    }

    pub fn default_location(&self) -> &CacheLocation {
        &self.config.default_location
    }

    pub fn default_properties(&self) -> &Properties {
        &self.config.default_properties
    }

    pub fn default_scope(&self) -> ScopeHandle {
        ScopeHandle::default_scope()
    }

    /// The manager for `(scope, location)`, created on first request.
    ///
    /// Omitted arguments fall back to the provider defaults. Concurrent
    /// callers asking for the same pair receive the same instance.
    pub fn get_cache_manager(
        &self,
        location: Option<&CacheLocation>,
        scope: Option<&ScopeHandle>,
        properties: Option<Properties>,
    ) -> Arc<CacheManager> {
        let location = location.unwrap_or(&self.config.default_location).clone();
        let default_scope;
        let scope = match scope {
            Some(scope) => scope,
            None => {
                default_scope = self.default_scope();
                &default_scope
            }
        };

        let mut registry = self.lock();
        let entry = registry.entry(scope.id()).or_insert_with(|| ScopeEntry {
            scope: scope.downgrade(),
            managers: HashMap::new(),
        });

        if let Some(existing) = entry.managers.get(&location) {
            if !existing.is_closed() {
                return Arc::clone(existing);
            }
        }

        let manager = Arc::new(CacheManager::new(
            self.self_ref.clone(),
            location.clone(),
            scope,
            properties.unwrap_or_else(|| self.config.default_properties.clone()),
            self.config.clone(),
            self.registrar.clone(),
        ));
        entry.managers.insert(location.clone(), Arc::clone(&manager));
        info!(location = %location, scope = %scope, "Created CacheManager");
        manager
    }

    /// Manager at the default location in the default scope.
    pub fn default_cache_manager(&self) -> Arc<CacheManager> {
        self.get_cache_manager(None, None, None)
    }

    /// Close every manager in every scope.
    pub fn close(&self) {
        let managers: Vec<Arc<CacheManager>> = self
            .lock()
            .drain()
            .flat_map(|(_, entry)| entry.managers.into_values())
            .collect();
        let count = managers.len();
        for manager in managers {
            manager.close();
        }
        info!(managers = count, "CachingProvider closed");
    }

    /// Close every manager of one scope.
    pub fn close_scope(&self, scope: &ScopeHandle) {
        let removed = self.lock().remove(&scope.id());
        if let Some(entry) = removed {
            for manager in entry.managers.into_values() {
                manager.close();
            }
            debug!(scope = %scope, "Closed scope");
        }
    }

    /// Close one manager. The scope entry goes away with its last manager.
    pub fn close_manager(&self, location: Option<&CacheLocation>, scope: Option<&ScopeHandle>) {
        let location = location.unwrap_or(&self.config.default_location);
        let scope_id = scope.map_or_else(|| self.default_scope().id(), ScopeHandle::id);
        let removed = self.take_manager(location, scope_id, |_| true);
        if let Some(manager) = removed {
            manager.close();
        }
    }

    /// Forget a manager without closing it. Called by a manager closing itself.
    pub(crate) fn remove(&self, manager: &CacheManager) {
        let (location, scope_id) = (manager.location(), manager.scope_id());
        let removed = self.take_manager(location, scope_id, |registered| {
            std::ptr::eq(Arc::as_ptr(registered), manager)
        });
        if removed.is_some() {
            debug!(location = %location, scope = %scope_id, "Deregistered CacheManager");
        }
    }

    /// Close the managers of every released scope. Returns how many scopes
    /// were reclaimed.
    pub fn prune_released_scopes(&self) -> usize {
        let released: Vec<ScopeEntry> = {
            let mut registry = self.lock();
            let ids: Vec<ScopeId> = registry
                .iter()
                .filter(|(_, entry)| entry.scope.is_released())
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };

        for entry in &released {
            for manager in entry.managers.values() {
                manager.close();
            }
            debug!(scope = %entry.scope.id(), "Pruned released scope");
        }
        released.len()
    }

    /// Number of registered managers across all scopes.
    pub fn manager_count(&self) -> usize {
        self.lock().values().map(|entry| entry.managers.len()).sum()
    }

    pub fn scope_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_supported(&self, feature: OptionalFeature) -> bool {
        match feature {
            OptionalFeature::StoreByReference => true,
        }
    }

    /// Remove the manager at `(scope, location)` if `matches` accepts it.
    fn take_manager(
        &self,
        location: &CacheLocation,
        scope_id: ScopeId,
        matches: impl FnOnce(&Arc<CacheManager>) -> bool,
    ) -> Option<Arc<CacheManager>> {
        let mut registry = self.lock();
        let entry = registry.get_mut(&scope_id)?;
        if !entry.managers.get(location).is_some_and(matches) {
            return None;
        }
        let removed = entry.managers.remove(location);
        if entry.managers.is_empty() {
            registry.remove(&scope_id);
        }
        removed
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ScopeId, ScopeEntry>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CachingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingProvider")
            .field("config", &self.config)
            .field("managers", &self.manager_count())
            .finish_non_exhaustive()
    }
}
