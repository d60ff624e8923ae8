//! cachet Core - Key, Event and Configuration Types
//!
//! Pure data structures shared by every other cachet crate: composite and
//! natural-id cache keys with their factory, change events and listener
//! capabilities, isolation scopes, cache configuration and the error
//! taxonomy. No registries live here.

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod key;
pub mod key_factory;

pub use config::{CacheConfiguration, ConfigurationSnapshot, ExpiryPolicy, Properties, ProviderConfig};
pub use error::{
    CachetError, CachetResult, ConfigError, InvalidationError, KeyShapeError, ManagementError,
    StateError, StoreError,
};
pub use event::{CacheEvent, EventKind, ListenerCapabilities};
pub use identity::{CacheLocation, ScopeHandle, ScopeId, TypeDescriptor, WeakScope, DEFAULT_LOCATION};
pub use key::{polynomial_hash, CacheEntryKey, CacheKey, IdentifierValue, NaturalIdKey};
pub use key_factory::{
    key_hash, CacheKeyFactory, IdTypeHasher, SessionContext, StructuralIdHasher, TenantSession,
};
