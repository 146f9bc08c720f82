//! Ghost tracking for evicted keys
//!
//! The ghost is not a queue of entries: it is two rotating bloom filters
//! over key hashes plus a small ring buffer that remembers the peak
//! frequency of a sample of recently evicted keys. A returning key found in
//! either filter is admitted straight to Main, and the ring restores the
//! frequency it had earned before eviction.

use crate::cache::bloom::BloomFilter;

/// Target false-positive rate for the ghost filters. A false positive only
/// misroutes a new key into Main, so the rate trades memory for admission
/// precision.
const GHOST_FPR: f64 = 1e-5;

const RING_SLOTS: usize = 256;

/// Fixed ring of (hash, peak frequency) pairs. The u8 position wraps at 256
/// for free, and lookups scan all slots; at this size the scan is a handful
/// of cache lines.
pub(crate) struct GhostFreqRing {
    hashes: [u64; RING_SLOTS],
    freqs: [u8; RING_SLOTS],
    pos: u8,
}

impl GhostFreqRing {
    pub(crate) const fn new() -> Self {
        GhostFreqRing {
            hashes: [0; RING_SLOTS],
            freqs: [0; RING_SLOTS],
            pos: 0,
        }
    }

    pub(crate) fn add(&mut self, hash: u64, freq: u8) {
        self.hashes[self.pos as usize] = hash;
        self.freqs[self.pos as usize] = freq;
        self.pos = self.pos.wrapping_add(1);
    }

    pub(crate) fn lookup(&self, hash: u64) -> Option<u8> {
        for (i, &h) in self.hashes.iter().enumerate() {
            if h == hash {
                return Some(self.freqs[i]);
            }
        }
        None
    }

    pub(crate) fn clear(&mut self) {
        self.hashes = [0; RING_SLOTS];
        self.freqs = [0; RING_SLOTS];
        self.pos = 0;
    }
}

/// Shard-local memory of recently evicted key hashes.
pub(crate) struct GhostTracker {
    active: BloomFilter,
    aging: BloomFilter,
    /// Inserts into the active filter before the pair rotates.
    capacity: usize,
    freq_ring: GhostFreqRing,
}

impl GhostTracker {
    /// `capacity` is sized to the owning shard's entry capacity, so the
    /// ghost window covers roughly one shard's worth of evictions per
    /// filter generation.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        GhostTracker {
            active: BloomFilter::new(capacity, GHOST_FPR),
            aging: BloomFilter::new(capacity, GHOST_FPR),
            capacity,
            freq_ring: GhostFreqRing::new(),
        }
    }

    pub(crate) fn contains(&self, hash: u64) -> bool {
        self.active.contains(hash) || self.aging.contains(hash)
    }

    /// Record an eviction. Peaks >= 2 are worth restoring on readmission
    /// and go into the frequency ring; colder evictions only mark the
    /// filter. Rotation happens when the active filter reaches capacity:
    /// the aging filter is wiped and the pair swaps.
    pub(crate) fn record(&mut self, hash: u64, peak_freq: u8) {
        if !self.active.contains(hash) {
            self.active.insert(hash);
            if peak_freq >= 2 {
                self.freq_ring.add(hash, peak_freq);
            }
        }
        if self.active.len() >= self.capacity {
            self.aging.reset();
            std::mem::swap(&mut self.active, &mut self.aging);
        }
    }

    /// Peak frequency last seen for this hash, if the ring still has it.
    pub(crate) fn restore_freq(&self, hash: u64) -> Option<u8> {
        self.freq_ring.lookup(hash)
    }

    pub(crate) fn clear(&mut self) {
        self.active.reset();
        self.aging.reset();
        self.freq_ring.clear();
    }
}
