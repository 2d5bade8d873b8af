//! Process-wide cache metrics

use crate::cache::types::CacheTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counters and running latency averages
///
/// Created with the manager and never reset.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    tier_hits: [AtomicU64; 4],
    get_time_us: AtomicU64,
    get_count: AtomicU64,
    set_time_us: AtomicU64,
    set_count: AtomicU64,
}

fn tier_slot(tier: CacheTier) -> Option<usize> {
    match tier {
        CacheTier::Memory => Some(0),
        CacheTier::Redis => Some(1),
        CacheTier::Database => Some(2),
        CacheTier::Cdn => Some(3),
        CacheTier::Hybrid => None,
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a hit served by `tier`
    pub fn record_hit(&self, tier: CacheTier) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(slot) = tier_slot(tier) {
            self.tier_hits[slot].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_get_time(&self, elapsed: Duration) {
        self.get_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.get_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set_time(&self, elapsed: Duration) {
        self.set_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.set_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy; evictions are owned by the backends and passed in
    pub fn snapshot(&self, evictions: u64) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let average_ms = |total_us: u64, count: u64| {
            if count == 0 {
                0.0
            } else {
                total_us as f64 / count as f64 / 1000.0
            }
        };

        let tier_hits = CacheTier::CONCRETE
            .iter()
            .filter_map(|tier| tier_slot(*tier).map(|slot| (*tier, load(&self.tier_hits[slot]))))
            .collect();

        MetricsSnapshot {
            hits: load(&self.hits),
            misses: load(&self.misses),
            sets: load(&self.sets),
            deletes: load(&self.deletes),
            evictions,
            errors: load(&self.errors),
            avg_get_time_ms: average_ms(load(&self.get_time_us), load(&self.get_count)),
            avg_set_time_ms: average_ms(load(&self.set_time_us), load(&self.set_count)),
            tier_hits,
        }
    }
}

/// Serializable view of [`CacheMetrics`]
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
    pub avg_get_time_ms: f64,
    pub avg_set_time_ms: f64,
    pub tier_hits: BTreeMap<CacheTier, u64>,
}

impl MetricsSnapshot {
    /// Hits over total lookups (0.0 - 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheMetrics {{ hits: {}, misses: {}, hit_ratio: {:.2}%, sets: {}, deletes: {}, evictions: {}, errors: {}, avg_get: {:.3}ms, avg_set: {:.3}ms }}",
            self.hits,
            self.misses,
            self.hit_ratio() * 100.0,
            self.sets,
            self.deletes,
            self.evictions,
            self.errors,
            self.avg_get_time_ms,
            self.avg_set_time_ms
        )
    }
}
