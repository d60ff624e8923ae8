//! Per-cache usage counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Lock-free counters. Recording is a no-op while statistics are disabled.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStatistics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.bump(&self.hits, 1);
    }

    pub fn record_miss(&self) {
        self.bump(&self.misses, 1);
    }

    pub fn record_put(&self) {
        self.bump(&self.puts, 1);
    }

    pub fn record_removal(&self) {
        self.bump(&self.removals, 1);
    }

    pub fn record_evictions(&self, count: u64) {
        self.bump(&self.evictions, count);
    }

    /// Reset every counter to zero.
    pub fn clear(&self) {
        for counter in [&self.hits, &self.misses, &self.puts, &self.removals, &self.evictions] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn bump(&self, counter: &AtomicU64, by: u64) {
        if self.is_enabled() {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub removals: u64,
    pub evictions: u64,
}

impl StatisticsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
