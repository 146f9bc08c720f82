//! In-memory mock store for coordinator and write-behind tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;

use super::PersistStore;
use crate::cache::error::CacheError;
use crate::cache::traits::{CacheKey, CacheValue};

/// Scriptable [`PersistStore`]: optional per-`set` latency and failure
/// injection, call counters, and an in-memory record map. Key validation
/// rejects empty keys and anything containing `/`.
pub(crate) struct MockStore<K: CacheKey, V: CacheValue> {
    pub(crate) records: DashMap<K, (V, Option<SystemTime>)>,
    pub(crate) set_calls: AtomicUsize,
    pub(crate) get_calls: AtomicUsize,
    pub(crate) fail_sets: AtomicBool,
    pub(crate) closed: AtomicBool,
    set_delay: Duration,
}

impl<K: CacheKey, V: CacheValue> MockStore<K, V> {
    pub(crate) fn new() -> Self {
        Self::with_set_delay(Duration::ZERO)
    }

    pub(crate) fn with_set_delay(set_delay: Duration) -> Self {
        MockStore {
            records: DashMap::new(),
            set_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            fail_sets: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            set_delay,
        }
    }

    pub(crate) fn sets(&self) -> usize {
        self.set_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> PersistStore<K, V> for MockStore<K, V> {
    fn validate_key(&self, key: &K) -> Result<(), CacheError> {
        let text = key.to_string();
        if text.is_empty() {
            return Err(CacheError::invalid_key("key cannot be empty"));
        }
        if text.contains('/') {
            return Err(CacheError::invalid_key("key contains a path separator"));
        }
        Ok(())
    }

    async fn get(&self, key: &K) -> Result<Option<(V, Option<SystemTime>)>, CacheError> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);
        let Some(record) = self.records.get(key) else {
            return Ok(None);
        };
        let (value, expiry) = record.value().clone();
        if matches!(expiry, Some(t) if t < SystemTime::now()) {
            return Ok(None);
        }
        Ok(Some((value, expiry)))
    }

    async fn set(&self, key: &K, value: &V, expiry: Option<SystemTime>) -> Result<(), CacheError> {
        if !self.set_delay.is_zero() {
            tokio::time::sleep(self.set_delay).await;
        }
        self.set_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_sets.load(Ordering::Relaxed) {
            return Err(CacheError::store("mock store set failure"));
        }
        self.records.insert(key.clone(), (value.clone(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &K) -> Result<(), CacheError> {
        self.records.remove(key);
        Ok(())
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        let cutoff = SystemTime::now() - max_age;
        let before = self.records.len();
        self.records
            .retain(|_, (_, expiry)| !matches!(expiry, Some(t) if *t < cutoff));
        Ok(before - self.records.len())
    }

    async fn flush(&self) -> Result<usize, CacheError> {
        let removed = self.records.len();
        self.records.clear();
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.records.len())
    }

    fn location(&self, key: &K) -> String {
        format!("mock://{}", key)
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
