//! Cache regions and the store seam beneath them.
//!
//! A [`Cache`] is what the persistence engine reads and writes. The entries
//! themselves live in a [`CacheStore`], which the storage engine supplies or
//! which defaults to [`InMemoryStore`]. Managers hold caches through the
//! type-erased [`ManagedCache`] view and hand out typed `Arc<Cache<K, V>>`
//! on request.
//!
//! # Example
//!
//! ```ignore
//! let cache = manager.create_cache::<CacheKey, Book>("books", CacheConfiguration::new())?;
//! let key = CacheKeyFactory::new().build_entity_key(&42.into(), &StructuralIdHasher, "Book", None);
//! cache.put(key.clone(), book)?;
//! assert!(cache.get(&key)?.is_some());
//! ```

pub mod in_memory;
pub mod region;
pub mod statistics;
pub mod traits;

pub use in_memory::InMemoryStore;
pub use region::{Cache, ManagedCache};
pub use statistics::{CacheStatistics, StatisticsSnapshot};
pub use traits::{CacheKeyType, CacheStore, CacheValueType, StoredEntry};
