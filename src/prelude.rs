//! Convenience re-exports for typical usage
//!
//! ```
//! use wraith::prelude::*;
//! ```

pub use crate::cache::config::CacheConfig;
pub use crate::cache::error::CacheError;
pub use crate::cache::tier::memory::MemoryCache;
pub use crate::cache::tier::persist::{LocalFsStore, PersistStore};
pub use crate::cache::traits::{CacheKey, CacheValue};
pub use crate::telemetry::StatsSnapshot;
pub use crate::wraith::{Wraith, WraithBuilder};
