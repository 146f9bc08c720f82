//! Tiered coordinator
//!
//! Routes every operation across the memory tier and the optional durable
//! store: memory answers reads first and misses fall through to the store
//! (repopulating memory on the way back); writes validate against the
//! store's key policy before touching either tier, then persist
//! synchronously (`set`) or through the write-behind queue (`set_async`).
//! Store failures degrade the cache to memory-only rather than failing it.

mod single_flight;
mod write_behind;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::config::CacheConfig;
use crate::cache::error::CacheError;
use crate::cache::tier::memory::{unix_nanos_now, MemoryCache};
use crate::cache::tier::persist::{expiry_to_unix_nanos, unix_nanos_to_expiry, PersistStore};
use crate::cache::traits::{CacheKey, CacheValue};
use crate::telemetry::CacheStatistics;
use single_flight::{FlightGroup, FlightRole};
use write_behind::WriteBehindQueue;

pub(crate) struct TieredCoordinator<K: CacheKey, V: CacheValue> {
    memory: MemoryCache<K, V>,
    store: Option<Arc<dyn PersistStore<K, V>>>,
    default_ttl: Option<Duration>,
    drain_timeout: Duration,
    write_behind: Option<WriteBehindQueue<K, V>>,
    flights: FlightGroup<K, V>,
    stats: Arc<CacheStatistics>,
    closed: AtomicBool,
}

impl<K: CacheKey, V: CacheValue> TieredCoordinator<K, V> {
    pub(crate) fn new(
        config: &CacheConfig,
        store: Option<Arc<dyn PersistStore<K, V>>>,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        let write_behind = store.as_ref().map(|store| {
            WriteBehindQueue::start(
                Arc::clone(store),
                config.write_queue_depth,
                config.write_concurrency,
                Arc::clone(&stats),
            )
        });
        TieredCoordinator {
            memory: MemoryCache::new(config.memory_size),
            store,
            default_ttl: config.default_ttl,
            drain_timeout: config.drain_timeout,
            write_behind,
            flights: FlightGroup::new(),
            stats,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn validate(&self, key: &K) -> Result<(), CacheError> {
        match &self.store {
            Some(store) => store.validate_key(key),
            None => Ok(()),
        }
    }

    /// Absolute expiry for a requested TTL; `None` falls back to the
    /// configured default, and no default means no expiry.
    fn expiry_nanos(&self, ttl: Option<Duration>) -> i64 {
        match ttl.or(self.default_ttl) {
            Some(ttl) => unix_nanos_now().saturating_add(ttl.as_nanos() as i64),
            None => 0,
        }
    }

    pub(crate) async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.ensure_open()?;

        if let Some(value) = self.memory.get(key) {
            self.stats.record_memory_hit();
            return Ok(Some(value));
        }

        let Some(store) = &self.store else {
            self.stats.record_miss();
            return Ok(None);
        };

        match store.get(key).await? {
            Some((value, expiry)) => {
                self.memory
                    .set_with_expiry(key.clone(), value.clone(), expiry_to_unix_nanos(expiry));
                self.stats.record_store_hit();
                Ok(Some(value))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    pub(crate) async fn set(
        &self,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.validate(&key)?;

        let expiry_nanos = self.expiry_nanos(ttl);
        self.memory
            .set_with_expiry(key.clone(), value.clone(), expiry_nanos);

        if let Some(store) = &self.store {
            // The memory insert is kept on failure: the cache degrades to
            // memory-only rather than losing the write entirely.
            if let Err(err) = store
                .set(&key, &value, unix_nanos_to_expiry(expiry_nanos))
                .await
            {
                self.stats.record_store_error();
                return Err(err);
            }
        }
        Ok(())
    }

    pub(crate) async fn set_async(
        &self,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.validate(&key)?;

        let expiry_nanos = self.expiry_nanos(ttl);
        self.memory
            .set_with_expiry(key.clone(), value.clone(), expiry_nanos);

        if let Some(write_behind) = &self.write_behind {
            write_behind.enqueue(key, value, unix_nanos_to_expiry(expiry_nanos));
        }
        Ok(())
    }

    /// Single-flight load: concurrent calls for the same key share one
    /// loader run. Loader failures reach every waiter and are not cached.
    pub(crate) async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>>,
    {
        self.ensure_open()?;

        if let Some(value) = self.get(&key).await? {
            return Ok(value);
        }

        match self.flights.join(&key) {
            FlightRole::Follower(flight) => flight.wait().await,
            FlightRole::Leader(flight) => {
                let result = self.lead_load(&key, loader).await;
                self.flights.complete(&key, &flight, result.clone());
                result
            }
        }
    }

    async fn lead_load<F, Fut>(&self, key: &K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CacheError>>,
    {
        // Another caller may have landed the key between the miss and
        // winning the flight.
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let value = loader().await?;
        match self.set(key.clone(), value.clone(), None).await {
            Ok(()) => Ok(value),
            Err(err @ (CacheError::InvalidKey(_) | CacheError::InvalidCacheId(_))) => Err(err),
            Err(CacheError::Closed) => Err(CacheError::Closed),
            Err(err) => {
                // Memory already holds the value; the loaded result wins.
                log::warn!("store write after load failed for {}: {}", key, err);
                Ok(value)
            }
        }
    }

    pub(crate) async fn delete(&self, key: &K) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.memory.delete(key);
        if let Some(store) = &self.store {
            store.delete(key).await?;
        }
        Ok(())
    }

    pub(crate) async fn flush(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        self.memory.flush();
        if let Some(store) = &self.store {
            store.flush().await?;
        }
        Ok(())
    }

    pub(crate) fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub(crate) async fn store_len(&self) -> Result<Option<usize>, CacheError> {
        match &self.store {
            Some(store) => Ok(Some(store.len().await?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        self.ensure_open()?;
        match &self.store {
            Some(store) => store.cleanup(max_age).await,
            None => Ok(0),
        }
    }

    pub(crate) fn location(&self, key: &K) -> Option<String> {
        self.store.as_ref().map(|store| store.location(key))
    }

    pub(crate) fn stats(&self) -> &CacheStatistics {
        &self.stats
    }

    /// Stop intake, drain the write-behind queue within the drain timeout,
    /// then close the store. Idempotent.
    pub(crate) async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(write_behind) = &self.write_behind {
            write_behind.shutdown(self.drain_timeout).await;
        }
        if let Some(store) = &self.store {
            store.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::persist::testing::MockStore;
    use std::sync::atomic::AtomicUsize;

    fn coordinator_with_store(
        store: Arc<MockStore<String, String>>,
    ) -> TieredCoordinator<String, String> {
        TieredCoordinator::new(
            &CacheConfig::default(),
            Some(store as Arc<dyn PersistStore<String, String>>),
            Arc::new(CacheStatistics::default()),
        )
    }

    fn memory_only() -> TieredCoordinator<String, String> {
        TieredCoordinator::new(
            &CacheConfig::default(),
            None,
            Arc::new(CacheStatistics::default()),
        )
    }

    #[tokio::test]
    async fn store_hits_repopulate_memory() {
        let store = Arc::new(MockStore::new());
        store
            .records
            .insert("k".to_string(), ("durable".to_string(), None));
        let coordinator = coordinator_with_store(Arc::clone(&store));

        assert_eq!(
            coordinator.get(&"k".to_string()).await.unwrap(),
            Some("durable".to_string())
        );
        // The second read must be served from memory.
        let store_reads = store.get_calls.load(Ordering::Relaxed);
        assert_eq!(
            coordinator.get(&"k".to_string()).await.unwrap(),
            Some("durable".to_string())
        );
        assert_eq!(store.get_calls.load(Ordering::Relaxed), store_reads);
    }

    #[tokio::test]
    async fn sync_set_failure_keeps_the_memory_copy() {
        let store = Arc::new(MockStore::new());
        store.fail_sets.store(true, Ordering::Relaxed);
        let coordinator = coordinator_with_store(Arc::clone(&store));

        let err = coordinator
            .set("k".to_string(), "v".to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));

        // Graceful degradation: memory still answers.
        assert_eq!(
            coordinator.get(&"k".to_string()).await.unwrap(),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn rejected_keys_never_touch_memory() {
        let store = Arc::new(MockStore::new());
        let coordinator = coordinator_with_store(Arc::clone(&store));
        let bad = "../../etc/passwd".to_string();

        assert!(coordinator
            .set(bad.clone(), "x".to_string(), None)
            .await
            .unwrap_err()
            .is_validation());
        assert!(coordinator
            .set_async(bad.clone(), "x".to_string(), None)
            .await
            .unwrap_err()
            .is_validation());
        assert_eq!(coordinator.memory_len(), 0);
        assert_eq!(coordinator.get(&bad).await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_or_load_runs_the_loader_once() {
        let coordinator = Arc::new(memory_only());
        let load_count = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let coordinator = Arc::clone(&coordinator);
            let load_count = Arc::clone(&load_count);
            tasks.push(tokio::spawn(async move {
                coordinator
                    .get_or_load("hot".to_string(), move || async move {
                        load_count.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok("loaded".to_string())
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "loaded");
        }
        assert_eq!(load_count.load(Ordering::SeqCst), 1);
        assert_eq!(
            coordinator.get(&"hot".to_string()).await.unwrap(),
            Some("loaded".to_string())
        );
    }

    #[tokio::test]
    async fn get_or_load_does_not_cache_loader_errors() {
        let coordinator = memory_only();

        let err = coordinator
            .get_or_load("k".to_string(), || async {
                Err(CacheError::store("origin down"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
        assert_eq!(coordinator.get(&"k".to_string()).await.unwrap(), None);

        // A later call runs a fresh loader and succeeds.
        let value = coordinator
            .get_or_load("k".to_string(), || async { Ok("recovered".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "recovered");
    }

    #[tokio::test]
    async fn closed_coordinator_rejects_operations() {
        let store = Arc::new(MockStore::new());
        let coordinator = coordinator_with_store(Arc::clone(&store));
        coordinator.close().await.unwrap();
        coordinator.close().await.unwrap(); // idempotent

        assert!(store.closed.load(Ordering::Relaxed));
        assert!(matches!(
            coordinator.get(&"k".to_string()).await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            coordinator.set("k".to_string(), "v".to_string(), None).await,
            Err(CacheError::Closed)
        ));
        assert!(matches!(
            coordinator
                .set_async("k".to_string(), "v".to_string(), None)
                .await,
            Err(CacheError::Closed)
        ));
    }

    #[tokio::test]
    async fn delete_reaches_both_tiers() {
        let store = Arc::new(MockStore::new());
        let coordinator = coordinator_with_store(Arc::clone(&store));

        coordinator
            .set("k".to_string(), "v".to_string(), None)
            .await
            .unwrap();
        coordinator.delete(&"k".to_string()).await.unwrap();
        assert_eq!(coordinator.get(&"k".to_string()).await.unwrap(), None);
        assert!(store.records.is_empty());
        // Deleting again is not an error.
        coordinator.delete(&"k".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn ttl_travels_to_the_store_and_back() {
        let store = Arc::new(MockStore::new());
        let coordinator = coordinator_with_store(Arc::clone(&store));

        coordinator
            .set(
                "k".to_string(),
                "v".to_string(),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        // Memory reports the entry expired; the mock still holds the
        // record, but its expiry travelled with it, so the repopulated
        // copy is expired as well.
        assert_eq!(coordinator.get(&"k".to_string()).await.unwrap(), None);
    }
}
