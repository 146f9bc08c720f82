//! Wraith - sharded in-memory cache with a durable second tier
//!
//! A generic key-value cache built for skewed, production-like access
//! patterns: one-hit wonders must not evict the working set, and returning
//! keys should be recognized and re-admitted warm.
//!
//! # Features
//!
//! - **Adaptive FIFO eviction**: a three-queue refinement of S3-FIFO with
//!   capped frequency counters, a death-row resurrection buffer, hot-item
//!   demotion and ghost-based admission via rotating bloom filters
//! - **Lock-free reads**: the hot path touches only a concurrent index and
//!   atomic counters; writes and eviction serialize per shard
//! - **Power-of-two sharding**: `hash & (N - 1)` routing, monomorphized
//!   integer and string hash paths
//! - **Tiered persistence**: write-through `set`, write-behind `set_async`,
//!   store-miss backfill, and a pluggable durable store (local files
//!   included)
//! - **Single-flight loads**: concurrent misses for one key share a loader
//!
//! # Example
//!
//! ```no_run
//! use wraith::Wraith;
//!
//! # async fn demo() -> Result<(), wraith::CacheError> {
//! let cache: Wraith<String, String> = Wraith::builder()
//!     .memory_size(100_000)
//!     .local_store("sessions")
//!     .build()
//!     .await?;
//!
//! cache.set_async("sid:1".into(), "alice".into(), None).await?;
//! assert_eq!(cache.get(&"sid:1".into()).await?, Some("alice".into()));
//! cache.close().await?;
//! # Ok(())
//! # }
//! ```

// Public API modules
pub mod prelude;
pub mod wraith;

// Cache implementation modules
pub mod cache;
pub mod telemetry;

// Re-export the public API at the crate root for convenience
pub use cache::config::CacheConfig;
pub use cache::error::CacheError;
pub use cache::tier::memory::MemoryCache;
pub use cache::tier::persist::{LocalFsStore, PersistStore};
pub use cache::traits::{CacheKey, CacheValue};
pub use telemetry::StatsSnapshot;
pub use wraith::{Wraith, WraithBuilder};
