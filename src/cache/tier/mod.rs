//! Cache tiers
//!
//! Two tiers: the in-memory sharded eviction engine and the optional
//! durable second tier behind it. The memory tier always answers first;
//! the durable tier backfills misses and absorbs writes, synchronously or
//! through the write-behind queue.

pub mod memory;
pub mod persist;
