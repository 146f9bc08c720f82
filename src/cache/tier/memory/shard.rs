//! One cache shard
//!
//! A shard owns an independent slice of the key space: a lock-free key
//! index for reads, the Small and Main FIFO queues, the ghost tracker, and
//! an eight-slot death row of entries awaiting final eviction. Reads never
//! take the shard lock; everything that touches the queues runs under it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::arena::{Arena, FifoQueue};
use super::entry::Entry;
use super::ghost::GhostTracker;
use super::{unix_nanos_now, DEMOTE_PEAK_FREQ, RESURRECT_FREQ};
use crate::cache::traits::{CacheKey, CacheValue};

/// Pending-eviction ring size. Small enough to scan, large enough that a
/// burst of evictions does not discard a just-requested entry.
pub(crate) const DEATH_ROW_SLOTS: usize = 8;

/// Small-queue share of shard capacity, in thousandths.
const SMALL_QUEUE_PER_MILLE: usize = 247;

/// Main may fill to this percentage of shard capacity during promotion
/// bursts before eviction runs inline.
const MAIN_QUEUE_LIMIT_PCT: usize = 90;

/// Internal shards of the per-shard key index; the index is only split to
/// keep its own lock cheap under read bursts.
const INDEX_SEGMENTS: usize = 4;

pub(crate) struct Shard<K: CacheKey, V: CacheValue> {
    /// Lock-free key -> entry index; the only structure reads touch.
    index: DashMap<K, Arc<Entry<K, V>>>,
    inner: Mutex<ShardInner<K, V>>,
    capacity: usize,
    /// Small-queue length at or below which eviction prefers Main.
    small_thresh: usize,
    /// Cache-wide live entry counter, shared across shards.
    total_entries: Arc<AtomicI64>,
    total_capacity: usize,
}

struct ShardInner<K: CacheKey, V: CacheValue> {
    arena: Arena<K, V>,
    small: FifoQueue,
    main: FifoQueue,
    ghost: GhostTracker,
    death_row: [Option<Arc<Entry<K, V>>>; DEATH_ROW_SLOTS],
    death_row_pos: usize,
    /// Set once the cache first reaches capacity; admission and eviction
    /// are skipped entirely before that.
    warmup_complete: bool,
}

impl<K: CacheKey, V: CacheValue> Shard<K, V> {
    pub(crate) fn new(
        capacity: usize,
        total_entries: Arc<AtomicI64>,
        total_capacity: usize,
    ) -> Self {
        let capacity = capacity.max(1);
        Shard {
            index: DashMap::with_capacity_and_shard_amount(capacity, INDEX_SEGMENTS),
            inner: Mutex::new(ShardInner {
                arena: Arena::with_capacity(capacity),
                small: FifoQueue::new(),
                main: FifoQueue::new(),
                ghost: GhostTracker::new(capacity),
                death_row: std::array::from_fn(|_| None),
                death_row_pos: 0,
                warmup_complete: false,
            }),
            capacity,
            small_thresh: capacity * SMALL_QUEUE_PER_MILLE / 1000,
            total_entries,
            total_capacity,
        }
    }

    /// Lock-free read. Counts the access and returns a clone of the value;
    /// death-row entries divert onto the locked resurrection path.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        let entry = Arc::clone(self.index.get(key)?.value());
        if entry.on_death_row() {
            return self.resurrect(key);
        }
        if entry.is_expired(unix_nanos_now()) {
            // Reported as a miss; eviction reclaims the entry later.
            return None;
        }
        entry.record_access();
        Some(entry.value())
    }

    /// Bring a death-row entry back: clear its slot and push it to Main
    /// with a protective frequency so it is not immediately re-evicted.
    fn resurrect(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let entry = Arc::clone(self.index.get(key)?.value());
        if !entry.on_death_row() {
            // Another thread resurrected it first; serve it as a plain hit.
            if entry.is_expired(unix_nanos_now()) {
                return None;
            }
            entry.record_access();
            return Some(entry.value());
        }

        for slot in inner.death_row.iter_mut() {
            if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, &entry)) {
                *slot = None;
                break;
            }
        }

        entry.set_on_death_row(false);
        entry.set_in_small(false);
        entry.restore_frequency(RESURRECT_FREQ);
        inner.main.push_back(&mut inner.arena, Arc::clone(&entry));
        self.total_entries.fetch_add(1, Ordering::Relaxed);

        Some(entry.value())
    }

    /// Insert or update. `hash` is the caller-computed key hash, cached on
    /// the entry so eviction never re-hashes.
    pub(crate) fn set(&self, key: K, value: V, expiry_nanos: i64, hash: u64) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(existing) = self.index.get(&key).map(|g| Arc::clone(g.value())) {
            existing.set_value(value);
            existing.set_expiry_nanos(expiry_nanos);
            existing.record_access();
            return;
        }

        let entry = Arc::new(Entry::new(key.clone(), value, expiry_nanos, hash));
        let full = self.total_entries.load(Ordering::Relaxed) >= self.total_capacity as i64;

        if !inner.warmup_complete && !full {
            inner.small.push_back(&mut inner.arena, Arc::clone(&entry));
            self.index.insert(key, entry);
            self.total_entries.fetch_add(1, Ordering::Relaxed);
            return;
        }
        inner.warmup_complete = true;

        let mut admit_to_small = true;
        if full {
            // The ghost remembers recently evicted hashes; returning keys
            // skip Small and recover the frequency they had earned.
            if inner.ghost.contains(hash) {
                admit_to_small = false;
                if let Some(peak) = inner.ghost.restore_freq(hash) {
                    entry.restore_frequency(peak);
                }
            }

            if inner.main.len() > 0 && inner.small.len() <= self.small_thresh {
                self.evict_from_main(inner);
            } else if inner.small.len() > 0 {
                self.evict_from_small(inner);
            }
        }

        entry.set_in_small(admit_to_small);
        if admit_to_small {
            inner.small.push_back(&mut inner.arena, Arc::clone(&entry));
        } else {
            inner.main.push_back(&mut inner.arena, Arc::clone(&entry));
        }
        self.index.insert(key, entry);
        self.total_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn delete(&self, key: &K) -> bool {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some((_, entry)) = self.index.remove(key) else {
            return false;
        };

        if entry.on_death_row() {
            for slot in inner.death_row.iter_mut() {
                if slot.as_ref().is_some_and(|held| Arc::ptr_eq(held, &entry)) {
                    *slot = None;
                    break;
                }
            }
            entry.set_on_death_row(false);
            // Death-row entries already left the live count.
            return true;
        }

        let slot = entry.slot();
        if entry.in_small() {
            inner.small.unlink(&mut inner.arena, slot);
        } else {
            inner.main.unlink(&mut inner.arena, slot);
        }
        self.total_entries.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Evict from Small: cold heads go to death row, warm heads promote to
    /// Main. Returns once one entry has left the queue.
    fn evict_from_small(&self, inner: &mut ShardInner<K, V>) {
        let main_limit = self.capacity * MAIN_QUEUE_LIMIT_PCT / 100;

        while let Some(slot) = inner.small.front() {
            let freq = inner.arena.entry(slot).freq();

            if freq < 2 {
                let entry = inner.small.unlink(&mut inner.arena, slot);
                self.send_to_death_row(inner, entry);
                return;
            }

            let entry = inner.small.unlink(&mut inner.arena, slot);
            entry.set_freq(0);
            entry.set_in_small(false);
            inner.main.push_back(&mut inner.arena, entry);

            if inner.main.len() > main_limit {
                self.evict_from_main(inner);
                return;
            }
        }
    }

    /// Evict from Main: zero-frequency heads leave (once-hot ones are
    /// demoted to Small instead), warm heads cycle to the tail with a
    /// decayed counter.
    fn evict_from_main(&self, inner: &mut ShardInner<K, V>) {
        while let Some(slot) = inner.main.front() {
            let freq = inner.arena.entry(slot).freq();

            if freq == 0 {
                let entry = inner.main.unlink(&mut inner.arena, slot);
                // Once-hot entries get one more round in Small before the
                // ghost sees them.
                if entry.peak_freq() >= DEMOTE_PEAK_FREQ {
                    entry.set_freq(1);
                    entry.set_in_small(true);
                    inner.small.push_back(&mut inner.arena, entry);
                    return;
                }
                self.send_to_death_row(inner, entry);
                return;
            }

            let entry = inner.main.unlink(&mut inner.arena, slot);
            entry.set_freq(freq - 1);
            inner.main.push_back(&mut inner.arena, entry);
        }
    }

    /// Park an entry on death row. If the target slot is occupied, its
    /// occupant is truly evicted first: removed from the index, its hash
    /// recorded in the ghost.
    fn send_to_death_row(&self, inner: &mut ShardInner<K, V>, entry: Arc<Entry<K, V>>) {
        let pos = inner.death_row_pos;
        if let Some(old) = inner.death_row[pos].take() {
            self.index.remove(&old.key);
            inner.ghost.record(old.hash, old.peak_freq());
            old.set_on_death_row(false);
        }

        entry.set_on_death_row(true);
        inner.death_row[pos] = Some(entry);
        inner.death_row_pos = (pos + 1) % DEATH_ROW_SLOTS;
        self.total_entries.fetch_sub(1, Ordering::Relaxed);
    }

    /// Keys currently indexed, including death-row entries.
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Drop everything: index, queues, ghost history and death row.
    pub(crate) fn flush(&self) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let flushed = self.index.len();
        self.index.clear();
        inner.arena.clear();
        inner.small.reset();
        inner.main.reset();
        inner.ghost.clear();
        inner.death_row = std::array::from_fn(|_| None);
        inner.death_row_pos = 0;
        flushed
    }
}

#[cfg(test)]
pub(crate) use test_support::EntryLocation;

#[cfg(test)]
mod test_support {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum EntryLocation {
        Small,
        Main,
        DeathRow,
    }

    impl<K: CacheKey, V: CacheValue> Shard<K, V> {
        pub(crate) fn location_of(&self, key: &K) -> Option<EntryLocation> {
            let _guard = self.inner.lock();
            let entry = Arc::clone(self.index.get(key)?.value());
            Some(if entry.on_death_row() {
                EntryLocation::DeathRow
            } else if entry.in_small() {
                EntryLocation::Small
            } else {
                EntryLocation::Main
            })
        }

        pub(crate) fn frequency_of(&self, key: &K) -> Option<(u8, u8)> {
            let entry = Arc::clone(self.index.get(key)?.value());
            Some((entry.freq(), entry.peak_freq()))
        }

        pub(crate) fn queue_lens(&self) -> (usize, usize) {
            let guard = self.inner.lock();
            (guard.small.len(), guard.main.len())
        }

        pub(crate) fn force_evict_from_main(&self) {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            self.evict_from_main(inner);
        }

        /// Every indexed key must live in exactly one of Small, Main or
        /// death row, and frequency bounds must hold.
        pub(crate) fn check_invariants(&self) {
            use super::super::MAX_FREQ;

            let guard = self.inner.lock();
            let mut seen: HashSet<K> = HashSet::new();

            for entry in guard.small.iter(&guard.arena) {
                assert!(entry.in_small() && !entry.on_death_row());
                assert!(seen.insert(entry.key.clone()), "duplicate in queues");
            }
            for entry in guard.main.iter(&guard.arena) {
                assert!(!entry.in_small() && !entry.on_death_row());
                assert!(seen.insert(entry.key.clone()), "duplicate in queues");
            }
            for entry in guard.death_row.iter().flatten() {
                assert!(entry.on_death_row());
                assert!(seen.insert(entry.key.clone()), "duplicate on death row");
            }

            assert_eq!(seen.len(), self.index.len(), "index/queue divergence");
            for item in self.index.iter() {
                let entry = item.value();
                assert!(seen.contains(&entry.key), "indexed key not queued");
                assert!(entry.freq() <= MAX_FREQ);
                assert!(entry.peak_freq() <= MAX_FREQ);
                assert!(entry.peak_freq() >= entry.freq());
            }
        }
    }
}
