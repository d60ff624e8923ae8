//! cachet Events - Listener Registration and Batched Dispatch
//!
//! Listeners declare which event kinds they handle when registered. Events
//! produced during one unit of work are buffered in an [`EventDispatcher`]
//! and delivered at the end of that unit, one batch per kind per
//! registration, in the order expired, created, updated, removed.

pub mod dispatcher;
pub mod listener;

pub use dispatcher::EventDispatcher;
pub use listener::{
    CacheEntryEventFilter, CacheEntryListener, EventBatch, ListenerRegistration, RegistrationId,
};
