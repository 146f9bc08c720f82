//! Public API for the wraith tiered cache
//!
//! `Wraith<K, V>` wraps the sharded in-memory tier and the optional durable
//! store behind one handle: reads check memory first and fall back to the
//! store, writes go through synchronously (`set`) or with write-behind
//! persistence (`set_async`), and `get_or_load` gives single-flight load
//! deduplication. Handles clone cheaply and share one cache.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::config::CacheConfig;
use crate::cache::coordinator::TieredCoordinator;
use crate::cache::error::CacheError;
use crate::cache::tier::persist::{LocalFsStore, PersistStore};
use crate::cache::traits::{CacheKey, CacheValue};
use crate::telemetry::{CacheStatistics, StatsSnapshot};

/// Tiered cache handle.
///
/// ```no_run
/// use wraith::Wraith;
///
/// # async fn demo() -> Result<(), wraith::CacheError> {
/// let cache: Wraith<String, u64> = Wraith::builder()
///     .memory_size(50_000)
///     .local_store("api-tokens")
///     .build()
///     .await?;
///
/// cache.set_async("user:42".to_string(), 7, None).await?;
/// assert_eq!(cache.get(&"user:42".to_string()).await?, Some(7));
/// cache.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Wraith<K: CacheKey, V: CacheValue> {
    coordinator: Arc<TieredCoordinator<K, V>>,
}

impl<K: CacheKey, V: CacheValue> Clone for Wraith<K, V> {
    fn clone(&self) -> Self {
        Wraith {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<K: CacheKey, V: CacheValue> Wraith<K, V> {
    /// Builder with fluent configuration.
    pub fn builder() -> WraithBuilder<K, V> {
        WraithBuilder::new()
    }

    /// Memory-only cache with default configuration.
    pub async fn new() -> Result<Self, CacheError> {
        Self::builder().build().await
    }

    /// Look up a key: memory first, then the durable store. A store hit
    /// repopulates memory with the value and its expiry.
    pub async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.coordinator.get(key).await
    }

    /// Store a value in memory and, when a store is configured, durably.
    /// A `ttl` of `None` applies the configured default TTL. The store
    /// write is synchronous; on its failure the memory insert is retained
    /// and the error returned.
    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.coordinator.set(key, value, ttl).await
    }

    /// Store a value in memory immediately and persist it in the
    /// background. Returns once the memory tier is updated; a full
    /// write-behind queue drops the durable copy rather than blocking.
    pub async fn set_async(
        &self,
        key: K,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.coordinator.set_async(key, value, ttl).await
    }

    /// Get the key or load it exactly once: concurrent callers for the
    /// same absent key share a single `loader` run and its outcome. Loader
    /// errors are not cached.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, CacheError>>,
    {
        self.coordinator.get_or_load(key, loader).await
    }

    /// Remove a key from both tiers. Absent keys are not errors.
    pub async fn delete(&self, key: &K) -> Result<(), CacheError> {
        self.coordinator.delete(key).await
    }

    /// Drop every entry from memory and, if configured, the store.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.coordinator.flush().await
    }

    /// Entries currently indexed in memory. Approximate under concurrent
    /// writers.
    pub fn len(&self) -> usize {
        self.coordinator.memory_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in the durable store; `None` when memory-only.
    pub async fn store_len(&self) -> Result<Option<usize>, CacheError> {
        self.coordinator.store_len().await
    }

    /// Remove store entries whose expiry lies more than `max_age` in the
    /// past. Returns how many were removed; 0 when memory-only.
    pub async fn cleanup(&self, max_age: Duration) -> Result<usize, CacheError> {
        self.coordinator.cleanup(max_age).await
    }

    /// Where the store would keep this key, for debugging. `None` when
    /// memory-only.
    pub fn location(&self, key: &K) -> Option<String> {
        self.coordinator.location(key)
    }

    /// Counter snapshot for this cache instance.
    pub fn statistics(&self) -> StatsSnapshot {
        self.coordinator.stats().snapshot()
    }

    /// Statistics as a JSON string.
    pub fn stats(&self) -> String {
        serde_json::to_string(&self.statistics()).unwrap_or_default()
    }

    /// Stop accepting writes, drain pending async writes within the
    /// configured drain timeout, and close the store. Idempotent; all
    /// later operations return [`CacheError::Closed`].
    pub async fn close(&self) -> Result<(), CacheError> {
        self.coordinator.close().await
    }
}

/// Fluent configuration for [`Wraith`].
///
/// Options are builder methods, so misspelled options fail to compile;
/// malformed values are rejected by `build`.
pub struct WraithBuilder<K: CacheKey, V: CacheValue> {
    config: CacheConfig,
    store: Option<Result<Arc<dyn PersistStore<K, V>>, CacheError>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: CacheKey, V: CacheValue> Default for WraithBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey, V: CacheValue> WraithBuilder<K, V> {
    pub fn new() -> Self {
        WraithBuilder {
            config: CacheConfig::default(),
            store: None,
            _marker: PhantomData,
        }
    }

    /// Maximum live entries held in memory (default 16 384).
    pub fn memory_size(mut self, entries: usize) -> Self {
        self.config.memory_size = entries;
        self
    }

    /// TTL applied when a caller passes no TTL (default: no expiry).
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = Some(ttl);
        self
    }

    /// How long `close` waits for queued async writes (default 5 s).
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Bound on queued async writes (default 4 096); overflow drops.
    pub fn write_queue_depth(mut self, depth: usize) -> Self {
        self.config.write_queue_depth = depth;
        self
    }

    /// Concurrent store writes drained from the queue (default 4).
    pub fn write_concurrency(mut self, concurrency: usize) -> Self {
        self.config.write_concurrency = concurrency;
        self
    }

    /// Attach a custom durable store.
    pub fn persist_store<S: PersistStore<K, V>>(mut self, store: S) -> Self {
        self.store = Some(Ok(Arc::new(store)));
        self
    }

    /// Attach a local-file store identified by `cache_id` under the
    /// platform cache directory.
    pub fn local_store(mut self, cache_id: &str) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        self.store = Some(
            LocalFsStore::new(cache_id).map(|s| Arc::new(s) as Arc<dyn PersistStore<K, V>>),
        );
        self
    }

    /// Attach a local-file store under an explicit base directory, for
    /// tests and relocatable deployments.
    pub fn local_store_in(mut self, cache_id: &str, base_dir: impl AsRef<Path>) -> Self
    where
        V: Serialize + DeserializeOwned,
    {
        self.store = Some(
            LocalFsStore::with_base_dir(cache_id, base_dir)
                .map(|s| Arc::new(s) as Arc<dyn PersistStore<K, V>>),
        );
        self
    }

    /// Validate the configuration and assemble the cache.
    pub async fn build(self) -> Result<Wraith<K, V>, CacheError> {
        self.config.validate()?;
        let store = self.store.transpose()?;
        let stats = Arc::new(CacheStatistics::default());
        let coordinator = TieredCoordinator::new(&self.config, store, stats);
        Ok(Wraith {
            coordinator: Arc::new(coordinator),
        })
    }
}
