//! Management beans: read-only configuration and statistics snapshots
//! published to a pluggable metrics sink.
//!
//! Every bean has a flat name derived from the owning manager (location and
//! isolation scope), the cache name and the bean kind:
//!
//! ```text
//! cachet:type=CacheStatistics,CacheManager=<location>,Scope=<scope-id>,Cache=<name>
//! ```
//!
//! Caches of the same name in different scopes therefore never share a bean.
//!
//! Separators the naming scheme reserves are replaced before the name is
//! assembled, so any location or cache name yields a well-formed bean name.

use crate::cache::StatisticsSnapshot;
use cachet_core::{CacheLocation, CachetResult, ConfigurationSnapshot, ManagementError, ScopeId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Domain prefix of every bean name.
pub const BEAN_DOMAIN: &str = "cachet";

static RESERVED_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r":|=|\n|,").expect("Invalid bean name regex"));

/// Which view of a cache a bean exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BeanKind {
    Configuration,
    Statistics,
}

impl BeanKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            BeanKind::Configuration => "CacheConfiguration",
            BeanKind::Statistics => "CacheStatistics",
        }
    }
}

impl fmt::Display for BeanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// The `(scope, location)` pair a cache's manager is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerIdentity {
    scope: ScopeId,
    location: CacheLocation,
}

impl ManagerIdentity {
    pub fn new(scope: ScopeId, location: CacheLocation) -> Self {
        Self { scope, location }
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    pub fn location(&self) -> &CacheLocation {
        &self.location
    }
}

impl fmt::Display for ManagerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.location, self.scope)
    }
}

/// Value a bean reports when queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "snapshot")]
pub enum BeanSnapshot {
    Configuration(ConfigurationSnapshot),
    Statistics(StatisticsSnapshot),
}

/// Source of a bean's current snapshot.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> BeanSnapshot;
}

impl<F> SnapshotProvider for F
where
    F: Fn() -> BeanSnapshot + Send + Sync,
{
    fn snapshot(&self) -> BeanSnapshot {
        self()
    }
}

/// Backend that holds registered beans.
pub trait MetricsSink: Send + Sync {
    /// Register a bean. Fails if the name is already taken.
    fn register(&self, name: &str, provider: Arc<dyn SnapshotProvider>) -> Result<(), ManagementError>;

    /// Unregister a bean. Fails if the name is unknown.
    fn unregister(&self, name: &str) -> Result<(), ManagementError>;

    /// Registered names matching `pattern`: an exact name, or a prefix
    /// followed by `*`.
    fn query_names(&self, pattern: &str) -> Vec<String>;

    /// Current snapshot of a registered bean.
    fn snapshot(&self, name: &str) -> Option<BeanSnapshot>;
}

// ============================================================================
// SINKS
// ============================================================================

/// Sink keeping beans in a map, queryable in-process.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    beans: RwLock<BTreeMap<String, Arc<dyn SnapshotProvider>>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.beans.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for InMemoryMetricsSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMetricsSink").field("beans", &self.names()).finish()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn register(&self, name: &str, provider: Arc<dyn SnapshotProvider>) -> Result<(), ManagementError> {
        let mut beans = self.beans.write().unwrap_or_else(PoisonError::into_inner);
        if beans.contains_key(name) {
            return Err(ManagementError::Registration {
                name: name.to_string(),
                reason: "instance already exists".to_string(),
            });
        }
        beans.insert(name.to_string(), provider);
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<(), ManagementError> {
        let mut beans = self.beans.write().unwrap_or_else(PoisonError::into_inner);
        match beans.remove(name) {
            Some(_) => Ok(()),
            None => Err(ManagementError::Unregistration {
                name: name.to_string(),
                reason: "instance not found".to_string(),
            }),
        }
    }

    fn query_names(&self, pattern: &str) -> Vec<String> {
        let beans = self.beans.read().unwrap_or_else(PoisonError::into_inner);
        match pattern.strip_suffix('*') {
            Some(prefix) => beans
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect(),
            None => beans.keys().filter(|name| *name == pattern).cloned().collect(),
        }
    }

    fn snapshot(&self, name: &str) -> Option<BeanSnapshot> {
        let provider = self
            .beans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        provider.map(|provider| provider.snapshot())
    }
}

/// Sink that also reports bean lifecycle and snapshots through `tracing`.
#[derive(Debug, Default)]
pub struct TracingMetricsSink {
    inner: InMemoryMetricsSink,
}

impl TracingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit one structured event per registered bean with its current snapshot.
    pub fn report(&self) {
        for name in self.inner.names() {
            if let Some(snapshot) = self.inner.snapshot(&name) {
                let rendered = serde_json::to_string(&snapshot).unwrap_or_default();
                info!(bean = %name, snapshot = %rendered, "Management bean snapshot");
            }
        }
    }
}

impl MetricsSink for TracingMetricsSink {
    fn register(&self, name: &str, provider: Arc<dyn SnapshotProvider>) -> Result<(), ManagementError> {
        self.inner.register(name, provider)?;
        info!(bean = %name, "Management bean registered");
        Ok(())
    }

    fn unregister(&self, name: &str) -> Result<(), ManagementError> {
        self.inner.unregister(name)?;
        info!(bean = %name, "Management bean unregistered");
        Ok(())
    }

    fn query_names(&self, pattern: &str) -> Vec<String> {
        self.inner.query_names(pattern)
    }

    fn snapshot(&self, name: &str) -> Option<BeanSnapshot> {
        self.inner.snapshot(name)
    }
}

// ============================================================================
// REGISTRAR
// ============================================================================

/// Registers and unregisters cache beans under their computed names.
#[derive(Clone)]
pub struct ManagementRegistrar {
    sink: Arc<dyn MetricsSink>,
}

impl ManagementRegistrar {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMetricsSink::new()))
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Flat bean name for one cache view.
    pub fn object_name(manager: &ManagerIdentity, cache_name: &str, kind: BeanKind) -> String {
        format!(
            "{}:type={},CacheManager={},Scope={},Cache={}",
            BEAN_DOMAIN,
            kind.type_name(),
            normalize(manager.location().as_str()),
            manager.scope(),
            normalize(cache_name)
        )
    }

    /// Register a bean unless one with the same name already exists.
    ///
    /// A concurrent registration of the same name winning the race between
    /// the lookup and the sink call counts as already registered.
    pub fn register(
        &self,
        manager: &ManagerIdentity,
        cache_name: &str,
        kind: BeanKind,
        bean: Arc<dyn SnapshotProvider>,
    ) -> CachetResult<()> {
        let name = Self::object_name(manager, cache_name, kind);
        if !self.sink.query_names(&name).is_empty() {
            debug!(bean = %name, "Management bean already registered");
            return Ok(());
        }
        match self.sink.register(&name, bean) {
            Ok(()) => {
                debug!(bean = %name, "Registered management bean");
                Ok(())
            }
            Err(_) if !self.sink.query_names(&name).is_empty() => {
                debug!(bean = %name, "Management bean registered concurrently");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Unregister every bean matching the computed name. No match is not an
    /// error; any sink failure is.
    pub fn unregister(&self, manager: &ManagerIdentity, cache_name: &str, kind: BeanKind) -> CachetResult<()> {
        let name = Self::object_name(manager, cache_name, kind);
        for registered in self.sink.query_names(&name) {
            self.sink.unregister(&registered)?;
            debug!(bean = %registered, "Unregistered management bean");
        }
        Ok(())
    }

    pub fn is_registered(&self, manager: &ManagerIdentity, cache_name: &str, kind: BeanKind) -> bool {
        !self
            .sink
            .query_names(&Self::object_name(manager, cache_name, kind))
            .is_empty()
    }

    /// Current snapshot of one cache bean, if registered.
    pub fn snapshot(&self, manager: &ManagerIdentity, cache_name: &str, kind: BeanKind) -> Option<BeanSnapshot> {
        self.sink.snapshot(&Self::object_name(manager, cache_name, kind))
    }
}

impl Default for ManagementRegistrar {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for ManagementRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagementRegistrar").finish_non_exhaustive()
    }
}

fn normalize(name: &str) -> String {
    RESERVED_CHARS.replace_all(name, ".").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachet_core::{CacheConfiguration, ScopeHandle};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config_bean() -> Arc<dyn SnapshotProvider> {
        Arc::new(|| BeanSnapshot::Configuration(CacheConfiguration::new().snapshot()))
    }

    fn demo_manager() -> ManagerIdentity {
        ManagerIdentity::new(ScopeHandle::default_scope().id(), CacheLocation::new("demo"))
    }

    /// Sink where another registration of the same name lands between the
    /// registrar's lookup and its register call.
    struct RacingSink {
        inner: InMemoryMetricsSink,
        raced: AtomicBool,
    }

    impl MetricsSink for RacingSink {
        fn register(&self, name: &str, provider: Arc<dyn SnapshotProvider>) -> Result<(), ManagementError> {
            self.inner.register(name, provider)
        }

        fn unregister(&self, name: &str) -> Result<(), ManagementError> {
            self.inner.unregister(name)
        }

        fn query_names(&self, pattern: &str) -> Vec<String> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let _ = self.inner.register(pattern, config_bean());
                return Vec::new();
            }
            self.inner.query_names(pattern)
        }

        fn snapshot(&self, name: &str) -> Option<BeanSnapshot> {
            self.inner.snapshot(name)
        }
    }

    #[test]
    fn test_object_name_normalizes_reserved_characters() {
        let scope = ScopeHandle::named("node");
        let manager = ManagerIdentity::new(scope.id(), CacheLocation::new("cachet://node:1"));
        let name = ManagementRegistrar::object_name(&manager, "a=b,c\nd", BeanKind::Statistics);
        assert_eq!(
            name,
            format!(
                "cachet:type=CacheStatistics,CacheManager=cachet.//node.1,Scope={},Cache=a.b.c.d",
                scope.id()
            )
        );
    }

    #[test]
    fn test_same_cache_in_two_scopes_gets_two_beans() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let registrar = ManagementRegistrar::new(sink.clone());
        let location = CacheLocation::new("demo");
        let (a, b) = (ScopeHandle::new(), ScopeHandle::new());
        let in_a = ManagerIdentity::new(a.id(), location.clone());
        let in_b = ManagerIdentity::new(b.id(), location);

        registrar
            .register(&in_a, "books", BeanKind::Statistics, config_bean())
            .unwrap();
        registrar
            .register(&in_b, "books", BeanKind::Statistics, config_bean())
            .unwrap();
        assert_eq!(sink.len(), 2);

        registrar.unregister(&in_a, "books", BeanKind::Statistics).unwrap();
        assert!(!registrar.is_registered(&in_a, "books", BeanKind::Statistics));
        assert!(registrar.is_registered(&in_b, "books", BeanKind::Statistics));
    }

    #[test]
    fn test_register_tolerates_concurrent_registration() {
        let sink = Arc::new(RacingSink {
            inner: InMemoryMetricsSink::new(),
            raced: AtomicBool::new(false),
        });
        let registrar = ManagementRegistrar::new(sink.clone());
        let manager = demo_manager();

        registrar
            .register(&manager, "books", BeanKind::Configuration, config_bean())
            .unwrap();
        assert_eq!(sink.inner.len(), 1);
        assert!(registrar.is_registered(&manager, "books", BeanKind::Configuration));
    }

    #[test]
    fn test_register_is_idempotent() {
        let sink = Arc::new(InMemoryMetricsSink::new());
        let registrar = ManagementRegistrar::new(sink.clone());
        let manager = demo_manager();

        registrar
            .register(&manager, "books", BeanKind::Configuration, config_bean())
            .unwrap();
        registrar
            .register(&manager, "books", BeanKind::Configuration, config_bean())
            .unwrap();

        assert_eq!(sink.len(), 1);
        assert!(registrar.is_registered(&manager, "books", BeanKind::Configuration));
        assert!(!registrar.is_registered(&manager, "books", BeanKind::Statistics));
    }

    #[test]
    fn test_unregister_without_match_is_noop() {
        let registrar = ManagementRegistrar::in_memory();
        let manager = demo_manager();
        assert!(registrar
            .unregister(&manager, "missing", BeanKind::Statistics)
            .is_ok());
    }

    #[test]
    fn test_unregister_removes_bean() {
        let registrar = ManagementRegistrar::in_memory();
        let manager = demo_manager();
        registrar
            .register(&manager, "books", BeanKind::Configuration, config_bean())
            .unwrap();
        registrar
            .unregister(&manager, "books", BeanKind::Configuration)
            .unwrap();
        assert!(!registrar.is_registered(&manager, "books", BeanKind::Configuration));
    }

    #[test]
    fn test_snapshot_is_read_through_provider() {
        let registrar = ManagementRegistrar::in_memory();
        let manager = demo_manager();
        registrar
            .register(&manager, "books", BeanKind::Configuration, config_bean())
            .unwrap();

        match registrar.snapshot(&manager, "books", BeanKind::Configuration) {
            Some(BeanSnapshot::Configuration(snapshot)) => assert!(!snapshot.read_through),
            other => panic!("unexpected snapshot: {:?}", other),
        }
    }

    #[test]
    fn test_sink_rejects_duplicates_and_unknown_names() {
        let sink = InMemoryMetricsSink::new();
        sink.register("a", config_bean()).unwrap();
        assert!(matches!(
            sink.register("a", config_bean()),
            Err(ManagementError::Registration { .. })
        ));
        assert!(matches!(
            sink.unregister("b"),
            Err(ManagementError::Unregistration { .. })
        ));
    }

    #[test]
    fn test_query_names_prefix_pattern() {
        let sink = InMemoryMetricsSink::new();
        sink.register("cachet:type=CacheStatistics,CacheManager=demo,Cache=a", config_bean())
            .unwrap();
        sink.register("cachet:type=CacheStatistics,CacheManager=demo,Cache=b", config_bean())
            .unwrap();
        sink.register("cachet:type=CacheStatistics,CacheManager=other,Cache=a", config_bean())
            .unwrap();

        assert_eq!(
            sink.query_names("cachet:type=CacheStatistics,CacheManager=demo,*").len(),
            2
        );
        assert!(sink.query_names("cachet:type=CacheStatistics").is_empty());
    }

    #[test]
    fn test_tracing_sink_delegates() {
        let sink = TracingMetricsSink::new();
        sink.register("bean", config_bean()).unwrap();
        assert_eq!(sink.query_names("bean"), vec!["bean".to_string()]);
        sink.report();
        sink.unregister("bean").unwrap();
        assert!(sink.snapshot("bean").is_none());
    }
}
