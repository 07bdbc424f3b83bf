//! Sharded second-chance cache
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 ShardedCache                   │
//! │   xxh64(key) % N ──► RwLock<CacheShard> × N    │
//! │  ┌──────────────┐  ┌──────────────┐            │
//! │  │ CacheShard 0 │  │ CacheShard 1 │   ...      │
//! │  │ map + CLOCK  │  │ map + CLOCK  │            │
//! │  └──────────────┘  └──────────────┘            │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Shards never lock themselves; callers take the lock returned by
//! `ShardedCache::lock_for` and hold it across the whole operation.

mod shard;
mod sharded;

pub use shard::{CacheShard, MIN_CAPACITY, ShardStats};
pub use sharded::{ShardLock, ShardedCache, ShardedCacheStats};
