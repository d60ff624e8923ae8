//! Error types for cachet operations

use thiserror::Error;

/// Configuration and usage errors.
///
/// These always surface synchronously; the caller must correct its usage.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("A cache named {name} already exists")]
    DuplicateCache { name: String },

    #[error("Incompatible {what} types: requested {requested} <> configured {configured}")]
    TypeMismatch {
        what: String,
        requested: String,
        configured: String,
    },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Name for {what} must not be empty")]
    EmptyName { what: String },
}

/// Operations attempted on something already closed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("CacheManager at {location} is closed")]
    ManagerClosed { location: String },

    #[error("Cache {name} is closed")]
    CacheClosed { name: String },
}

/// A key handed back to the factory that it did not produce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyShapeError {
    #[error("Only composite cache keys are supported, got {found}")]
    NotCompositeKey { found: String },

    #[error("Only natural-id cache keys are supported, got {found}")]
    NotNaturalIdKey { found: String },
}

/// Failures while (un)registering management beans with a metrics sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManagementError {
    #[error("Error registering cache bean {name}: {reason}")]
    Registration { name: String, reason: String },

    #[error("Error unregistering object instance {name}: {reason}")]
    Unregistration { name: String, reason: String },
}

/// Failures decoding or applying an inbound cluster invalidation message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidationError {
    #[error("Failed to decode invalidation message: {reason}")]
    Decode { reason: String },

    #[error("Failed to encode invalidation message: {reason}")]
    Encode { reason: String },

    #[error("Cache {cache} cannot hold keys of shape {shape}")]
    UnsupportedKey { cache: String, shape: String },

    #[error("Cache {cache} cannot hold timestamp values")]
    UnsupportedValue { cache: String },
}

/// Failures reported by the external store a cache wraps.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store operation {operation} failed for cache {cache}: {reason}")]
    Backend {
        cache: String,
        operation: String,
        reason: String,
    },
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CachetError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Key shape error: {0}")]
    KeyShape(#[from] KeyShapeError),

    #[error("Management error: {0}")]
    Management(#[from] ManagementError),

    #[error("Invalidation error: {0}")]
    Invalidation(#[from] InvalidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl CachetError {
    /// True for usage errors the caller is expected to fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, CachetError::Config(_))
    }

    /// True when the target was already closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, CachetError::State(_))
    }
}

/// Result type alias for cachet operations.
pub type CachetResult<T> = Result<T, CachetError>;

// =============================================================================
// TESTS
// =============================================================================
