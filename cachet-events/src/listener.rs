//! Listener and filter contracts, and the registration record binding them.

use cachet_core::{CacheEvent, EventKind, ListenerCapabilities};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Finite, non-restartable sequence of event copies handed to a listener.
pub type EventBatch<K, V> = std::vec::IntoIter<CacheEvent<K, V>>;

/// Receiver of batched cache change notifications.
///
/// Only the callbacks matching the capabilities declared on the
/// [`ListenerRegistration`] are ever invoked; the rest may keep their
/// default no-op bodies.
pub trait CacheEntryListener<K, V>: Send + Sync {
    fn on_created(&self, _events: EventBatch<K, V>) {}

    fn on_updated(&self, _events: EventBatch<K, V>) {}

    fn on_removed(&self, _events: EventBatch<K, V>) {}

    fn on_expired(&self, _events: EventBatch<K, V>) {}
}

/// Route a batch to the callback for its kind.
pub(crate) fn deliver<K, V>(listener: &dyn CacheEntryListener<K, V>, kind: EventKind, batch: EventBatch<K, V>) {
    match kind {
        EventKind::Created => listener.on_created(batch),
        EventKind::Updated => listener.on_updated(batch),
        EventKind::Removed => listener.on_removed(batch),
        EventKind::Expired => listener.on_expired(batch),
    }
}

/// Predicate selecting which events a registration receives.
pub trait CacheEntryEventFilter<K, V>: Send + Sync {
    fn evaluate(&self, event: &CacheEvent<K, V>) -> bool;
}

impl<K, V, F> CacheEntryEventFilter<K, V> for F
where
    F: Fn(&CacheEvent<K, V>) -> bool + Send + Sync,
{
    fn evaluate(&self, event: &CacheEvent<K, V>) -> bool {
        self(event)
    }
}

/// Identifier of a registration, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

impl RegistrationId {
    fn next() -> Self {
        Self(NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "registration-{}", self.0)
    }
}

/// A listener together with its declared capabilities, optional filter and
/// old-value requirement.
pub struct ListenerRegistration<K, V> {
    id: RegistrationId,
    listener: Arc<dyn CacheEntryListener<K, V>>,
    filter: Option<Arc<dyn CacheEntryEventFilter<K, V>>>,
    capabilities: ListenerCapabilities,
    old_value_required: bool,
}

impl<K, V> ListenerRegistration<K, V> {
    pub fn new(listener: Arc<dyn CacheEntryListener<K, V>>, capabilities: ListenerCapabilities) -> Self {
        Self {
            id: RegistrationId::next(),
            listener,
            filter: None,
            capabilities,
            old_value_required: false,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn CacheEntryEventFilter<K, V>>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_old_value_required(mut self, required: bool) -> Self {
        self.old_value_required = required;
        self
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }

    pub fn capabilities(&self) -> ListenerCapabilities {
        self.capabilities
    }

    pub fn is_old_value_required(&self) -> bool {
        self.old_value_required
    }

    pub fn listener(&self) -> &Arc<dyn CacheEntryListener<K, V>> {
        &self.listener
    }

    /// Whether the registration's filter (if any) lets the event through.
    pub fn selects(&self, event: &CacheEvent<K, V>) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter.evaluate(event))
    }
}

impl<K, V> Clone for ListenerRegistration<K, V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            listener: Arc::clone(&self.listener),
            filter: self.filter.clone(),
            capabilities: self.capabilities,
            old_value_required: self.old_value_required,
        }
    }
}

impl<K, V> fmt::Debug for ListenerRegistration<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("has_filter", &self.filter.is_some())
            .field("old_value_required", &self.old_value_required)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl CacheEntryListener<u32, u32> for Silent {}

    #[test]
    fn test_registration_ids_are_unique() {
        let a = ListenerRegistration::new(Arc::new(Silent), ListenerCapabilities::all());
        let b = ListenerRegistration::new(Arc::new(Silent), ListenerCapabilities::all());
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
    }

    #[test]
    fn test_filter_selection() {
        let even_keys = |event: &CacheEvent<u32, u32>| event.key() % 2 == 0;
        let registration = ListenerRegistration::new(Arc::new(Silent), ListenerCapabilities::CREATED)
            .with_filter(Arc::new(even_keys));

        let name: Arc<str> = Arc::from("numbers");
        assert!(registration.selects(&CacheEvent::created(Arc::clone(&name), 2, 0)));
        assert!(!registration.selects(&CacheEvent::created(name, 3, 0)));
    }

    #[test]
    fn test_registration_without_filter_selects_everything() {
        let registration = ListenerRegistration::new(Arc::new(Silent), ListenerCapabilities::REMOVED);
        assert!(registration.selects(&CacheEvent::removed(Arc::from("numbers"), 1, 1)));
        assert!(!registration.is_old_value_required());
        assert!(format!("{:?}", registration).contains("has_filter: false"));
    }
}
