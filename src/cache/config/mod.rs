//! Cache configuration
//!
//! Configuration is set through the builder, so unknown options fail at
//! compile time; `validate` rejects malformed values at build time. Also
//! home to cache-ID validation and the platform cache-directory resolution
//! used by the local-file durable store.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::error::CacheError;

/// Default in-memory capacity when none is configured.
pub const DEFAULT_MEMORY_SIZE: usize = 16_384;

/// Default bound on queued write-behind operations.
pub const DEFAULT_WRITE_QUEUE_DEPTH: usize = 4_096;

/// Default number of concurrent write-behind store writes.
pub const DEFAULT_WRITE_CONCURRENCY: usize = 4;

/// Default period `close` waits for queued async writes to drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest accepted cache ID, in bytes.
pub const MAX_CACHE_ID_LEN: usize = 64;

/// Tiered-cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of live in-memory entries.
    pub memory_size: usize,
    /// TTL applied when a caller passes no TTL. `None` means no expiry.
    pub default_ttl: Option<Duration>,
    /// How long `close` waits for the write-behind queue to drain.
    pub drain_timeout: Duration,
    /// Bound on queued async writes; overflow drops the write and logs.
    pub write_queue_depth: usize,
    /// Concurrent store writes drained from the write-behind queue.
    pub write_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            memory_size: DEFAULT_MEMORY_SIZE,
            default_ttl: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            write_concurrency: DEFAULT_WRITE_CONCURRENCY,
        }
    }
}

impl CacheConfig {
    /// Reject configurations the cache cannot honor.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.memory_size == 0 {
            return Err(CacheError::invalid_configuration(
                "memory_size must be greater than zero",
            ));
        }
        if self.write_queue_depth == 0 {
            return Err(CacheError::invalid_configuration(
                "write_queue_depth must be greater than zero",
            ));
        }
        if self.write_concurrency == 0 {
            return Err(CacheError::invalid_configuration(
                "write_concurrency must be greater than zero",
            ));
        }
        if let Some(ttl) = self.default_ttl {
            if ttl.is_zero() {
                return Err(CacheError::invalid_configuration(
                    "default_ttl must be non-zero when set",
                ));
            }
        }
        Ok(())
    }
}

/// Validate a cache ID for use as a storage namespace.
///
/// IDs become directory names, so anything that could escape the store's
/// base directory is rejected outright.
pub fn validate_cache_id(cache_id: &str) -> Result<(), CacheError> {
    if cache_id.is_empty() {
        return Err(CacheError::invalid_cache_id("cache ID cannot be empty"));
    }
    if cache_id.len() > MAX_CACHE_ID_LEN {
        return Err(CacheError::invalid_cache_id(format!(
            "cache ID too long: {} bytes (max {})",
            cache_id.len(),
            MAX_CACHE_ID_LEN
        )));
    }
    if cache_id.contains("..") {
        return Err(CacheError::invalid_cache_id(
            "cache ID contains a traversal sequence",
        ));
    }
    if cache_id.contains('/') || cache_id.contains('\\') {
        return Err(CacheError::invalid_cache_id(
            "cache ID contains a path separator",
        ));
    }
    if cache_id.contains('\0') {
        return Err(CacheError::invalid_cache_id("cache ID contains a null byte"));
    }
    Ok(())
}

/// Resolve the platform cache directory used as the default store base.
///
/// Linux honors `XDG_CACHE_HOME` and falls back to `~/.cache`; macOS uses
/// `~/Library/Caches`; Windows uses `%LOCALAPPDATA%`. The system temp
/// directory is the last resort when no home is discoverable.
pub fn default_cache_root() -> PathBuf {
    if cfg!(target_os = "macos") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Caches");
        }
    } else if cfg!(target_os = "windows") {
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(local);
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
            if !xdg.is_empty() {
                return PathBuf::from(xdg);
            }
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".cache");
        }
    }
    std::env::temp_dir()
}
