//! Cache entry with eviction metadata
//!
//! Entries are shared between the shard's key index and exactly one queue
//! (or a death-row slot). Frequency fields are atomic because the lock-free
//! read path updates them; the value and queue bookkeeping are written only
//! under the shard lock. `on_death_row` is the one flag readers inspect to
//! divert onto the locked resurrection path.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};

use parking_lot::RwLock;

use super::MAX_FREQ;

/// Arena slot marker for entries not currently linked into a queue.
pub(crate) const NO_SLOT: u32 = u32::MAX;

/// One cached key/value pair.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    /// Key hash cached at creation; eviction never re-hashes.
    pub(crate) hash: u64,
    value: RwLock<V>,
    /// Absolute expiry in unix nanoseconds; 0 means no expiry.
    expiry_nanos: AtomicI64,
    /// Access count in [0, MAX_FREQ].
    freq: AtomicU8,
    /// High-water mark of `freq` over this entry's lifetime.
    peak_freq: AtomicU8,
    on_death_row: AtomicBool,
    in_small: AtomicBool,
    /// Arena slot of the queue node owning this entry, NO_SLOT on death row.
    slot: AtomicU32,
}

impl<K, V: Clone> Entry<K, V> {
    pub(crate) fn new(key: K, value: V, expiry_nanos: i64, hash: u64) -> Self {
        Entry {
            key,
            hash,
            value: RwLock::new(value),
            expiry_nanos: AtomicI64::new(expiry_nanos),
            freq: AtomicU8::new(0),
            peak_freq: AtomicU8::new(0),
            on_death_row: AtomicBool::new(false),
            in_small: AtomicBool::new(true),
            slot: AtomicU32::new(NO_SLOT),
        }
    }

    pub(crate) fn value(&self) -> V {
        self.value.read().clone()
    }

    pub(crate) fn set_value(&self, value: V) {
        *self.value.write() = value;
    }

    pub(crate) fn expiry_nanos(&self) -> i64 {
        self.expiry_nanos.load(Ordering::Relaxed)
    }

    pub(crate) fn set_expiry_nanos(&self, nanos: i64) {
        self.expiry_nanos.store(nanos, Ordering::Relaxed);
    }

    pub(crate) fn is_expired(&self, now_nanos: i64) -> bool {
        let expiry = self.expiry_nanos();
        expiry != 0 && now_nanos > expiry
    }

    /// Count one access: bump `freq` up to the cap and fold the new value
    /// into `peak_freq`. Best-effort under concurrency, but the cap is never
    /// exceeded and the peak never regresses.
    pub(crate) fn record_access(&self) {
        let mut current = self.freq.load(Ordering::Relaxed);
        while current < MAX_FREQ {
            match self.freq.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak_freq.fetch_max(current + 1, Ordering::Relaxed);
                    return;
                }
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn freq(&self) -> u8 {
        self.freq.load(Ordering::Relaxed)
    }

    pub(crate) fn set_freq(&self, freq: u8) {
        self.freq.store(freq, Ordering::Relaxed);
    }

    pub(crate) fn peak_freq(&self) -> u8 {
        self.peak_freq.load(Ordering::Relaxed)
    }

    /// Set both counters, used for ghost restoration and resurrection.
    pub(crate) fn restore_frequency(&self, freq: u8) {
        self.freq.store(freq, Ordering::Relaxed);
        self.peak_freq.store(freq, Ordering::Relaxed);
    }

    pub(crate) fn on_death_row(&self) -> bool {
        self.on_death_row.load(Ordering::Acquire)
    }

    pub(crate) fn set_on_death_row(&self, pending: bool) {
        self.on_death_row.store(pending, Ordering::Release);
    }

    pub(crate) fn in_small(&self) -> bool {
        self.in_small.load(Ordering::Relaxed)
    }

    pub(crate) fn set_in_small(&self, in_small: bool) {
        self.in_small.store(in_small, Ordering::Relaxed);
    }

    pub(crate) fn slot(&self) -> u32 {
        self.slot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_slot(&self, slot: u32) {
        self.slot.store(slot, Ordering::Relaxed);
    }
}
