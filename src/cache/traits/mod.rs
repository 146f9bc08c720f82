//! Key and value traits
//!
//! The cache inspects the key type once, at monomorphization time, through
//! `CacheKey::hash64`: integer keys go through a full-avalanche integer
//! mixer, string keys through the wyhash-style byte mixer, and everything
//! else falls back to hashing its textual form. The textual form (`Display`)
//! is also what durable stores validate and persist, so a key has exactly
//! one external representation.

use std::fmt::Display;
use std::hash::Hash;

use crate::cache::hash;

/// A type usable as a cache key.
///
/// Implementations for the common key types are provided below; custom key
/// types only need `Display` (plus the usual map bounds) and inherit the
/// textual hash path, or override [`hash64`](CacheKey::hash64) when the
/// textual round-trip is too slow.
pub trait CacheKey: Clone + Eq + Hash + Display + Send + Sync + 'static {
    /// 64-bit hash used for shard routing and ghost tracking.
    ///
    /// Must be deterministic for the lifetime of the process. The default
    /// hashes the key's textual form.
    fn hash64(&self) -> u64 {
        hash::hash_str(&self.to_string())
    }
}

macro_rules! int_cache_key {
    ($($t:ty),*) => {
        $(impl CacheKey for $t {
            #[inline(always)]
            fn hash64(&self) -> u64 {
                hash::hash_i64(*self as i64)
            }
        })*
    };
}

int_cache_key!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl CacheKey for String {
    #[inline(always)]
    fn hash64(&self) -> u64 {
        hash::hash_str(self)
    }
}

impl CacheKey for &'static str {
    #[inline(always)]
    fn hash64(&self) -> u64 {
        hash::hash_str(self)
    }
}

/// A type usable as a cache value.
///
/// Values are cloned out of the cache on hits, so cheaply-cloneable types
/// (or `Arc`-wrapped payloads) are preferred for large values. Persisting to
/// a durable store additionally requires `serde::Serialize` and
/// `serde::de::DeserializeOwned`, enforced where the store is constructed.
pub trait CacheValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> CacheValue for T {}
