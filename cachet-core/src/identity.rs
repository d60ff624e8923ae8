//! Identity types: isolation scopes, manager locations and type descriptors

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Location used when a caller does not name one.
pub const DEFAULT_LOCATION: &str = "cachet";

// ============================================================================
// SCOPE HANDLES
// ============================================================================

/// Stable identifier of an isolation scope, usable as a registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ScopeInner {
    id: ScopeId,
    label: String,
}

/// Opaque isolation-domain token.
///
/// Managers are memoized per `(scope, location)`. Registries hold a
/// [`WeakScope`] only; once every `ScopeHandle` clone is dropped the scope
/// counts as released and its registry entries may be pruned.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    inner: Arc<ScopeInner>,
}

static DEFAULT_SCOPE: Lazy<ScopeHandle> = Lazy::new(|| ScopeHandle::named("default"));

impl ScopeHandle {
    /// Create a fresh, unlabeled scope.
    pub fn new() -> Self {
        Self::named("scope")
    }

    /// Create a fresh scope with a human-readable label.
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: ScopeId(Uuid::now_v7()),
                label: label.into(),
            }),
        }
    }

    /// The process-wide default scope. It is never released.
    pub fn default_scope() -> ScopeHandle {
        DEFAULT_SCOPE.clone()
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Non-owning reference to this scope.
    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for ScopeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ScopeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ScopeHandle {}

impl fmt::Display for ScopeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.label, self.inner.id)
    }
}

/// Weak counterpart of [`ScopeHandle`]. The id stays readable after release.
#[derive(Debug, Clone)]
pub struct WeakScope {
    id: ScopeId,
    inner: Weak<ScopeInner>,
}

impl WeakScope {
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Upgrade back to a handle, `None` once the scope has been released.
    pub fn upgrade(&self) -> Option<ScopeHandle> {
        self.inner.upgrade().map(|inner| ScopeHandle { inner })
    }

    pub fn is_released(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

// ============================================================================
// LOCATIONS
// ============================================================================

/// URI-like name of a cache manager inside one scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheLocation(String);

impl CacheLocation {
    pub fn new(location: impl Into<String>) -> Self {
        Self(location.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CacheLocation {
    fn default() -> Self {
        Self(DEFAULT_LOCATION.to_string())
    }
}

impl fmt::Display for CacheLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheLocation {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CacheLocation {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// TYPE DESCRIPTORS
// ============================================================================

/// Runtime descriptor of a cache key or value type.
///
/// Equality is by `TypeId`; the name is informational.
#[derive(Debug, Clone, Copy)]
pub struct TypeDescriptor {
    id: TypeId,
    name: &'static str,
}

impl TypeDescriptor {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TypeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDescriptor {}

impl std::hash::Hash for TypeDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_handles_are_distinct() {
        let a = ScopeHandle::new();
        let b = ScopeHandle::new();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_default_scope_is_stable() {
        assert_eq!(ScopeHandle::default_scope(), ScopeHandle::default_scope());
        assert_eq!(ScopeHandle::default_scope().label(), "default");
    }

    #[test]
    fn test_weak_scope_release() {
        let scope = ScopeHandle::named("request");
        let weak = scope.downgrade();
        assert!(!weak.is_released());
        assert_eq!(weak.upgrade().map(|s| s.id()), Some(scope.id()));

        let id = scope.id();
        drop(scope);
        assert!(weak.is_released());
        assert!(weak.upgrade().is_none());
        assert_eq!(weak.id(), id);
    }

    #[test]
    fn test_location_default() {
        assert_eq!(CacheLocation::default().as_str(), DEFAULT_LOCATION);
        assert_eq!(CacheLocation::from("demo").to_string(), "demo");
    }

    #[test]
    fn test_type_descriptor_equality() {
        assert_eq!(TypeDescriptor::of::<u64>(), TypeDescriptor::of::<u64>());
        assert_ne!(TypeDescriptor::of::<u64>(), TypeDescriptor::of::<String>());
        assert!(TypeDescriptor::of::<String>().name().contains("String"));
    }
}
