//! Sharded cache with caller-held shard locks
//!
//! Keys are routed to a shard by `xxh64(key) % shard_count`. Each shard sits
//! behind its own `RwLock`, and the lock itself is handed out by
//! [`ShardedCache::lock_for`]. The coordinator holds one shard's guard across
//! a cache mutation and the paired durable-store mutation, so no reader can
//! observe the cache disagreeing with the store in between.
//!
//! The pass-through operations take the already-acquired guard and check that
//! it belongs to the key's shard.

use super::shard::CacheShard;
use bytes::Bytes;
use parking_lot::RwLock;
use shardkv_common::{Error, Key, Result};
use std::sync::atomic::Ordering;
use xxhash_rust::xxh64::xxh64;

/// The lock guarding one shard
pub type ShardLock = RwLock<CacheShard>;

/// Seed for the routing hash; changing it remaps every key
const ROUTING_SEED: u64 = 0;

/// Fixed set of independently locked cache shards
pub struct ShardedCache {
    shards: Vec<ShardLock>,
    capacity_per_shard: usize,
}

impl ShardedCache {
    /// Build `shard_count` shards of `capacity_per_shard` entries each
    pub fn new(shard_count: usize, capacity_per_shard: usize) -> Result<Self> {
        if shard_count == 0 {
            return Err(Error::Configuration("shard count must be at least 1".into()));
        }

        let shards = (0..shard_count)
            .map(|index| CacheShard::with_index(index, capacity_per_shard).map(RwLock::new))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shards,
            capacity_per_shard,
        })
    }

    /// Index of the shard owning `key`
    #[inline]
    pub fn shard_index(&self, key: &[u8]) -> usize {
        (xxh64(key, ROUTING_SEED) % self.shards.len() as u64) as usize
    }

    /// Lock of the shard owning `key`
    ///
    /// Nothing is acquired here; the caller takes `read()` or `write()` and
    /// keeps the guard for as long as the operation must stay atomic.
    #[inline]
    pub fn lock_for(&self, key: &[u8]) -> &ShardLock {
        &self.shards[self.shard_index(key)]
    }

    /// Shard lock by index
    pub fn shard(&self, index: usize) -> Option<&ShardLock> {
        self.shards.get(index)
    }

    /// Look up `key` in the shard behind `guard`
    pub fn get(&self, guard: &CacheShard, key: &[u8]) -> Result<Bytes> {
        self.check_owner(guard, key)?;
        guard.get(key)
    }

    /// Insert `key` into the shard behind `guard`, returning any evicted key
    pub fn put(&self, guard: &mut CacheShard, key: Key, value: Bytes) -> Result<Option<Key>> {
        self.check_owner(guard, key.as_bytes())?;
        Ok(guard.put(key, value))
    }

    /// Cache a value read from the store unless `key` is already cached
    pub fn fill(&self, guard: &mut CacheShard, key: Key, value: Bytes) -> Result<Option<Key>> {
        self.check_owner(guard, key.as_bytes())?;
        Ok(guard.fill(key, value))
    }

    /// Remove `key` from the shard behind `guard`
    pub fn delete(&self, guard: &mut CacheShard, key: &[u8]) -> Result<()> {
        self.check_owner(guard, key)?;
        guard.delete(key)
    }

    /// Clear every shard, taking each write lock in turn
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Capacity of each shard
    pub const fn capacity_per_shard(&self) -> usize {
        self.capacity_per_shard
    }

    /// Total entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Check if every shard is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Aggregate statistics across shards
    pub fn stats(&self) -> ShardedCacheStats {
        let mut stats = ShardedCacheStats::default();
        for shard in &self.shards {
            let shard = shard.read();
            let s = shard.stats();
            stats.hits += s.hits.load(Ordering::Relaxed);
            stats.misses += s.misses.load(Ordering::Relaxed);
            stats.insertions += s.insertions.load(Ordering::Relaxed);
            stats.evictions += s.evictions.load(Ordering::Relaxed);
            stats.second_chances += s.second_chances.load(Ordering::Relaxed);
            stats.shard_entry_counts.push(shard.len());
        }
        stats.total_entries = stats.shard_entry_counts.iter().sum();
        stats
    }

    fn check_owner(&self, guard: &CacheShard, key: &[u8]) -> Result<()> {
        let expected = self.shard_index(key);
        if guard.index() != expected {
            return Err(Error::internal(format!(
                "guard for shard {} used for a key owned by shard {}",
                guard.index(),
                expected
            )));
        }
        Ok(())
    }
}

/// Statistics for a sharded cache
#[derive(Debug, Clone, Default)]
pub struct ShardedCacheStats {
    /// Total entries
    pub total_entries: usize,
    /// Total hits
    pub hits: u64,
    /// Total misses
    pub misses: u64,
    /// Total admissions of new keys
    pub insertions: u64,
    /// Total evictions
    pub evictions: u64,
    /// Total second-chance rotations
    pub second_chances: u64,
    /// Per-shard entry counts
    pub shard_entry_counts: Vec<usize>,
}

impl ShardedCacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
