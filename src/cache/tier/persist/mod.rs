//! Durable store interface
//!
//! The tiered coordinator talks to the second tier through this trait.
//! Implementations own their key-validation policy; the coordinator
//! validates before touching memory so a rejected key never enters either
//! tier. Absent keys are not errors anywhere in the interface.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::cache::error::CacheError;
use crate::cache::traits::{CacheKey, CacheValue};

pub mod localfs;
#[cfg(test)]
pub(crate) mod testing;

pub use localfs::LocalFsStore;

/// A durable key-value store behind the memory tier.
///
/// `expiry` is `None` for "no expiry" throughout. Implementations must be
/// safe for concurrent use; the write-behind queue calls `set` from
/// multiple tasks at once.
#[async_trait]
pub trait PersistStore<K: CacheKey, V: CacheValue>: Send + Sync + 'static {
    /// Policy check for keys entering this store. Must not touch storage.
    fn validate_key(&self, key: &K) -> Result<(), CacheError>;

    /// Fetch a value and its expiry. Expired records read as `None`.
    async fn get(&self, key: &K) -> Result<Option<(V, Option<SystemTime>)>, CacheError>;

    async fn set(&self, key: &K, value: &V, expiry: Option<SystemTime>)
        -> Result<(), CacheError>;

    /// Remove a key; removing an absent key succeeds.
    async fn delete(&self, key: &K) -> Result<(), CacheError>;

    /// Remove entries whose expiry lies more than `max_age` in the past.
    /// Returns how many were removed.
    async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError>;

    /// Remove every entry, returning how many were removed.
    async fn flush(&self) -> Result<usize, CacheError>;

    /// Number of stored entries.
    async fn len(&self) -> Result<usize, CacheError>;

    /// Opaque debug identifier for where a key would be stored.
    fn location(&self, key: &K) -> String;

    /// Release resources. The store is unusable afterwards.
    async fn close(&self) -> Result<(), CacheError>;
}

/// Expiry instant as unix nanoseconds; 0 encodes "no expiry".
pub(crate) fn expiry_to_unix_nanos(expiry: Option<SystemTime>) -> i64 {
    expiry
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Inverse of [`expiry_to_unix_nanos`].
pub(crate) fn unix_nanos_to_expiry(nanos: i64) -> Option<SystemTime> {
    (nanos > 0).then(|| UNIX_EPOCH + Duration::from_nanos(nanos as u64))
}
