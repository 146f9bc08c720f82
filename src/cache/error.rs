//! Error types for cache operations
//!
//! A single crate-wide error enum covering key validation, configuration,
//! durable-store I/O, serialization and lifecycle failures. Errors are cheap
//! to clone so that single-flight waiters can all observe the same failure.

use std::fmt;

/// Error returned by cache and durable-store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key rejected by the configured store's validation policy.
    InvalidKey(String),
    /// Cache ID rejected (empty, path separators, traversal or null bytes).
    InvalidCacheId(String),
    /// Configuration rejected at build time.
    InvalidConfiguration(String),
    /// Durable-store failure; memory state is unaffected.
    Store(String),
    /// Filesystem failure in the durable tier.
    Io(String),
    /// Value could not be encoded for the durable tier.
    Serialization(String),
    /// Durable record failed to decode; treated as a miss and removed.
    Corruption(String),
    /// Operation on a coordinator after `close()`.
    Closed,
    /// Bounded wait elapsed (e.g. the close drain period).
    Timeout,
}

impl CacheError {
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        CacheError::InvalidKey(msg.into())
    }

    pub fn invalid_cache_id(msg: impl Into<String>) -> Self {
        CacheError::InvalidCacheId(msg.into())
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        CacheError::InvalidConfiguration(msg.into())
    }

    pub fn store(msg: impl fmt::Display) -> Self {
        CacheError::Store(msg.to_string())
    }

    pub fn io(msg: impl fmt::Display) -> Self {
        CacheError::Io(msg.to_string())
    }

    pub fn serialization(msg: impl fmt::Display) -> Self {
        CacheError::Serialization(msg.to_string())
    }

    pub fn corruption(msg: impl fmt::Display) -> Self {
        CacheError::Corruption(msg.to_string())
    }

    /// Whether the error indicates a rejected key or cache ID. Validation
    /// errors never mutate cache state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey(_) | CacheError::InvalidCacheId(_)
        )
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            CacheError::InvalidCacheId(msg) => write!(f, "invalid cache ID: {}", msg),
            CacheError::InvalidConfiguration(msg) => write!(f, "invalid configuration: {}", msg),
            CacheError::Store(msg) => write!(f, "store error: {}", msg),
            CacheError::Io(msg) => write!(f, "I/O error: {}", msg),
            CacheError::Serialization(msg) => write!(f, "serialization error: {}", msg),
            CacheError::Corruption(msg) => write!(f, "corrupt record: {}", msg),
            CacheError::Closed => write!(f, "cache is closed"),
            CacheError::Timeout => write!(f, "operation timed out"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_classification() {
        assert!(CacheError::invalid_key("bad").is_validation());
        assert!(CacheError::invalid_cache_id("bad").is_validation());
        assert!(!CacheError::Closed.is_validation());
        assert!(!CacheError::store("down").is_validation());
    }

    #[test]
    fn display_includes_detail() {
        let err = CacheError::invalid_key("key too long: 150 bytes (max 127)");
        assert!(err.to_string().contains("150 bytes"));
    }

    #[test]
    fn io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
