//! Cache change events
//!
//! Events are plain value records. Each listener registration receives its
//! own clones, so no two registrations ever observe a shared event.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// EVENT KINDS
// ============================================================================

/// Kind of change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    Created,
    Updated,
    Removed,
    Expired,
}

impl EventKind {
    /// All kinds, in dispatch order.
    pub const DISPATCH_ORDER: [EventKind; 4] = [
        EventKind::Expired,
        EventKind::Created,
        EventKind::Updated,
        EventKind::Removed,
    ];

    /// Whether events of this kind naturally carry a prior value.
    pub fn carries_old_value(&self) -> bool {
        !matches!(self, EventKind::Created)
    }

    /// Whether the entry is gone after an event of this kind.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Removed | EventKind::Expired)
    }

    /// Capability a listener must declare to receive this kind.
    pub fn capability(&self) -> ListenerCapabilities {
        match self {
            EventKind::Created => ListenerCapabilities::CREATED,
            EventKind::Updated => ListenerCapabilities::UPDATED,
            EventKind::Removed => ListenerCapabilities::REMOVED,
            EventKind::Expired => ListenerCapabilities::EXPIRED,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Created => write!(f, "created"),
            EventKind::Updated => write!(f, "updated"),
            EventKind::Removed => write!(f, "removed"),
            EventKind::Expired => write!(f, "expired"),
        }
    }
}

bitflags! {
    /// Notification categories a listener declares at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ListenerCapabilities: u8 {
        const CREATED = 0b0001;
        const UPDATED = 0b0010;
        const REMOVED = 0b0100;
        const EXPIRED = 0b1000;
    }
}

impl ListenerCapabilities {
    pub fn accepts(&self, kind: EventKind) -> bool {
        self.contains(kind.capability())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// A single change to a cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEvent<K, V> {
    cache_name: Arc<str>,
    kind: EventKind,
    key: K,
    value: Option<V>,
    old_value: Option<V>,
    occurred_at: DateTime<Utc>,
}

impl<K, V> CacheEvent<K, V> {
    pub fn created(cache_name: Arc<str>, key: K, value: V) -> Self {
        Self::new(cache_name, EventKind::Created, key, Some(value), None)
    }

    pub fn updated(cache_name: Arc<str>, key: K, value: V, old_value: V) -> Self {
        Self::new(cache_name, EventKind::Updated, key, Some(value), Some(old_value))
    }

    pub fn removed(cache_name: Arc<str>, key: K, old_value: V) -> Self {
        Self::new(cache_name, EventKind::Removed, key, None, Some(old_value))
    }

    pub fn expired(cache_name: Arc<str>, key: K, old_value: V) -> Self {
        Self::new(cache_name, EventKind::Expired, key, None, Some(old_value))
    }

    pub fn new(
        cache_name: Arc<str>,
        kind: EventKind,
        key: K,
        value: Option<V>,
        old_value: Option<V>,
    ) -> Self {
        Self {
            cache_name,
            kind,
            key,
            value,
            old_value,
            occurred_at: Utc::now(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Current value. Always `None` for removed and expired entries once
    /// delivered to a listener.
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn old_value(&self) -> Option<&V> {
        self.old_value.as_ref()
    }

    pub fn is_old_value_available(&self) -> bool {
        self.old_value.is_some()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

impl<K: Clone, V: Clone> CacheEvent<K, V> {
    /// Copy of this event as a registration should see it.
    ///
    /// The old value survives only when the registration wants it and the
    /// kind carries one. Removed and expired copies never carry a current
    /// value; the value existed only before the entry went away.
    pub fn project(&self, old_value_required: bool) -> Self {
        let keep_old = old_value_required && self.kind.carries_old_value();
        let value = if self.kind.is_terminal() {
            None
        } else {
            self.value.clone()
        };
        Self {
            cache_name: Arc::clone(&self.cache_name),
            kind: self.kind,
            key: self.key.clone(),
            value,
            old_value: if keep_old { self.old_value.clone() } else { None },
            occurred_at: self.occurred_at,
        }
    }
}
