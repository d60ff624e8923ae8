//! Buffered, per-kind batching of cache events.
//!
//! Producers (possibly several worker threads inside one unit of work) add
//! events; at the unit-of-work boundary a single `dispatch` hands every
//! interested registration one batch per kind. The whole dispatcher sits
//! behind one mutex: dispatch runs once per unit of work, and holding the
//! lock across delivery keeps batches of different kinds from interleaving
//! with concurrent producers.

use crate::listener::{deliver, ListenerRegistration};
use cachet_core::{CacheEvent, EventKind};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::trace;

type PendingEvents<K, V> = HashMap<EventKind, Vec<CacheEvent<K, V>>>;

/// Collects events and delivers them in batches.
pub struct EventDispatcher<K, V> {
    /// Allocated on the first added event.
    pending: Mutex<Option<PendingEvents<K, V>>>,
}

impl<K, V> EventDispatcher<K, V>
where
    K: Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
        }
    }

    /// Queue an event under a capability kind.
    pub fn add_event(&self, kind: EventKind, event: CacheEvent<K, V>) -> &Self {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .get_or_insert_with(HashMap::new)
            .entry(kind)
            .or_default()
            .push(event);
        self
    }

    /// Queue an event under its own kind.
    pub fn push(&self, event: CacheEvent<K, V>) -> &Self {
        let kind = event.kind();
        self.add_event(kind, event)
    }

    /// Number of queued events across all kinds.
    pub fn pending_len(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending
            .as_ref()
            .map_or(0, |map| map.values().map(Vec::len).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.pending_len() == 0
    }

    /// Deliver and drain every queued event.
    ///
    /// For each kind with pending events, each registration declaring that
    /// capability receives the events its filter selects, projected for its
    /// old-value requirement, as one batch in insertion order. A registration
    /// whose filter selects nothing still receives its (empty) batch. Returns
    /// the number of batches delivered.
    pub fn dispatch(&self, registrations: &[ListenerRegistration<K, V>]) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut events_by_kind) = pending.take() else {
            return 0;
        };

        let mut batches = 0;
        for kind in EventKind::DISPATCH_ORDER {
            let Some(events) = events_by_kind.remove(&kind) else {
                continue;
            };
            if events.is_empty() {
                continue;
            }

            for registration in registrations
                .iter()
                .filter(|registration| registration.capabilities().accepts(kind))
            {
                let batch: Vec<CacheEvent<K, V>> = events
                    .iter()
                    .filter(|event| registration.selects(event))
                    .map(|event| event.project(registration.is_old_value_required()))
                    .collect();

                trace!(
                    kind = %kind,
                    registration = %registration.id(),
                    events = batch.len(),
                    "Dispatching cache event batch"
                );
                deliver(registration.listener().as_ref(), kind, batch.into_iter());
                batches += 1;
            }
        }
        batches
    }
}

impl<K, V> Default for EventDispatcher<K, V>
where
    K: Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{CacheEntryListener, EventBatch};
    use cachet_core::ListenerCapabilities;
    use std::sync::Arc;

    type Batch = (EventKind, Vec<CacheEvent<&'static str, i32>>);

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Batch>>,
    }

    impl Recorder {
        fn record(&self, kind: EventKind, events: EventBatch<&'static str, i32>) {
            self.batches.lock().unwrap().push((kind, events.collect()));
        }

        fn batches(&self) -> Vec<Batch> {
            self.batches.lock().unwrap().clone()
        }
    }

    impl CacheEntryListener<&'static str, i32> for Recorder {
        fn on_created(&self, events: EventBatch<&'static str, i32>) {
            self.record(EventKind::Created, events);
        }

        fn on_updated(&self, events: EventBatch<&'static str, i32>) {
            self.record(EventKind::Updated, events);
        }

        fn on_removed(&self, events: EventBatch<&'static str, i32>) {
            self.record(EventKind::Removed, events);
        }

        fn on_expired(&self, events: EventBatch<&'static str, i32>) {
            self.record(EventKind::Expired, events);
        }
    }

    fn name() -> Arc<str> {
        Arc::from("books")
    }

    #[test]
    fn test_dispatch_without_events_is_noop() {
        let dispatcher: EventDispatcher<&str, i32> = EventDispatcher::new();
        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::all());
        assert_eq!(dispatcher.dispatch(&[registration]), 0);
        assert!(recorder.batches().is_empty());
    }

    #[test]
    fn test_created_updated_removed_are_separate_batches() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push(CacheEvent::created(name(), "k1", 1));
        dispatcher.push(CacheEvent::updated(name(), "k1", 2, 1));
        dispatcher.push(CacheEvent::removed(name(), "k1", 2));

        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::all())
            .with_old_value_required(true);

        assert_eq!(dispatcher.dispatch(&[registration]), 3);

        let batches = recorder.batches();
        assert_eq!(batches.len(), 3);

        let (kind, created) = &batches[0];
        assert_eq!(*kind, EventKind::Created);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].value(), Some(&1));
        assert_eq!(created[0].old_value(), None);

        let (kind, updated) = &batches[1];
        assert_eq!(*kind, EventKind::Updated);
        assert_eq!(updated[0].old_value(), Some(&1));
        assert_eq!(updated[0].value(), Some(&2));

        let (kind, removed) = &batches[2];
        assert_eq!(*kind, EventKind::Removed);
        assert_eq!(removed[0].old_value(), Some(&2));
        assert_eq!(removed[0].value(), None);
    }

    #[test]
    fn test_uninterested_kind_is_never_delivered() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push(CacheEvent::created(name(), "k1", 1));
        dispatcher.push(CacheEvent::expired(name(), "k2", 5));

        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::CREATED);

        assert_eq!(dispatcher.dispatch(&[registration]), 1);
        let batches = recorder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, EventKind::Created);
    }

    #[test]
    fn test_batch_preserves_insertion_order() {
        let dispatcher = EventDispatcher::new();
        for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
            dispatcher.add_event(EventKind::Created, CacheEvent::created(name(), key, i as i32));
        }

        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::CREATED);
        dispatcher.dispatch(&[registration]);

        let keys: Vec<&str> = recorder.batches()[0].1.iter().map(|e| *e.key()).collect();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_filter_and_old_value_are_per_registration() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push(CacheEvent::updated(name(), "keep", 2, 1));
        dispatcher.push(CacheEvent::updated(name(), "drop", 4, 3));

        let filtered = Arc::new(Recorder::default());
        let plain = Arc::new(Recorder::default());
        let only_keep = |event: &CacheEvent<&'static str, i32>| *event.key() == "keep";
        let registrations = vec![
            ListenerRegistration::new(filtered.clone(), ListenerCapabilities::UPDATED)
                .with_filter(Arc::new(only_keep))
                .with_old_value_required(true),
            ListenerRegistration::new(plain.clone(), ListenerCapabilities::UPDATED),
        ];

        assert_eq!(dispatcher.dispatch(&registrations), 2);

        let filtered = filtered.batches();
        assert_eq!(filtered[0].1.len(), 1);
        assert_eq!(filtered[0].1[0].old_value(), Some(&1));

        let plain = plain.batches();
        assert_eq!(plain[0].1.len(), 2);
        assert!(plain[0].1.iter().all(|e| e.old_value().is_none()));
    }

    #[test]
    fn test_filter_rejecting_everything_still_gets_one_call() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push(CacheEvent::created(name(), "k1", 1));

        let recorder = Arc::new(Recorder::default());
        let reject_all = |_: &CacheEvent<&'static str, i32>| false;
        let registration =
            ListenerRegistration::new(recorder.clone(), ListenerCapabilities::all()).with_filter(Arc::new(reject_all));

        assert_eq!(dispatcher.dispatch(&[registration]), 1);
        let batches = recorder.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, EventKind::Created);
        assert!(batches[0].1.is_empty());
    }

    #[test]
    fn test_dispatch_drains_pending_events() {
        let dispatcher = EventDispatcher::new();
        dispatcher.push(CacheEvent::created(name(), "k1", 1));
        assert_eq!(dispatcher.pending_len(), 1);

        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::all());
        dispatcher.dispatch(std::slice::from_ref(&registration));
        assert!(dispatcher.is_empty());

        assert_eq!(dispatcher.dispatch(&[registration]), 0);
        assert_eq!(recorder.batches().len(), 1);
    }

    #[test]
    fn test_concurrent_producers() {
        let dispatcher: Arc<EventDispatcher<&'static str, i32>> = Arc::new(EventDispatcher::new());
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        dispatcher.push(CacheEvent::created(Arc::from("books"), "k", worker * 100 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dispatcher.pending_len(), 100);

        let recorder = Arc::new(Recorder::default());
        let registration = ListenerRegistration::new(recorder.clone(), ListenerCapabilities::CREATED);
        assert_eq!(dispatcher.dispatch(&[registration]), 1);
        assert_eq!(recorder.batches()[0].1.len(), 100);
    }
}
