//! Cache telemetry
//!
//! Hit/miss accounting on cache-padded atomics so the hot path never
//! shares a cache line between counters. Counters are monotonic and
//! relaxed; a snapshot taken under concurrency is approximate.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use serde::Serialize;

/// Live operation counters for one cache instance.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    memory_hits: CachePadded<AtomicU64>,
    store_hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    async_writes_dropped: CachePadded<AtomicU64>,
    store_errors: CachePadded<AtomicU64>,
}

impl CacheStatistics {
    pub(crate) fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_hit(&self) {
        self.store_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_async_write_dropped(&self) {
        self.async_writes_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let store_hits = self.store_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = memory_hits + store_hits + misses;
        StatsSnapshot {
            memory_hits,
            store_hits,
            misses,
            hit_rate: if lookups > 0 {
                (memory_hits + store_hits) as f64 / lookups as f64
            } else {
                0.0
            },
            async_writes_dropped: self.async_writes_dropped.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    /// Hits (either tier) over all lookups, 0.0 when nothing was looked up.
    pub hit_rate: f64,
    pub async_writes_dropped: u64,
    pub store_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_accounts_for_both_tiers() {
        let stats = CacheStatistics::default();
        stats.record_memory_hit();
        stats.record_memory_hit();
        stats.record_store_hit();
        stats.record_miss();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.memory_hits, 2);
        assert_eq!(snapshot.store_hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_statistics_have_zero_hit_rate() {
        let snapshot = CacheStatistics::default().snapshot();
        assert_eq!(snapshot.hit_rate, 0.0);
    }
}
