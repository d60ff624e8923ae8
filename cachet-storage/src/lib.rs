//! cachet Storage - Caches, Managers and the Caching Provider
//!
//! The registry side of the second-level cache:
//!
//! - [`CachingProvider`] memoizes one [`CacheManager`] per `(scope, location)`
//!   and owns the shutdown cascade.
//! - [`CacheManager`] is a named registry of [`Cache`]s with idempotent close.
//! - [`Cache`] wraps an external [`CacheStore`], raises batched listener
//!   events and publishes outbound invalidation.
//! - [`ManagementRegistrar`] exposes configuration and statistics beans
//!   through a [`MetricsSink`].
//! - [`InvalidationReceiver`] applies inbound cluster invalidation without
//!   republishing it.

pub mod cache;
pub mod invalidation;
pub mod management;
pub mod manager;
pub mod provider;

pub use cache::{
    Cache, CacheKeyType, CacheStatistics, CacheStore, CacheValueType, InMemoryStore, ManagedCache,
    StatisticsSnapshot, StoredEntry,
};
pub use invalidation::{InvalidationMessage, InvalidationPublisher, InvalidationReceiver, InvalidationTarget};
pub use management::{
    BeanKind, BeanSnapshot, InMemoryMetricsSink, ManagementRegistrar, ManagerIdentity, MetricsSink, SnapshotProvider,
    TracingMetricsSink, BEAN_DOMAIN,
};
pub use manager::CacheManager;
pub use provider::{CachingProvider, OptionalFeature};
