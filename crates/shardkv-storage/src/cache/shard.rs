//! Second-chance (CLOCK) cache shard
//!
//! A shard holds at most `capacity` entries. Entries sit in a scan order
//! (head = next to be inspected). Admitting a new key into a full shard scans
//! from the head: a referenced entry has its flag cleared and is moved to the
//! tail, the first unreferenced entry is evicted.
//!
//! The scan order is a doubly linked list threaded through an arena of nodes
//! by index, so removal from the middle (delete) is O(1) without raw links.
//!
//! A shard does not lock itself. [`super::ShardedCache`] wraps every shard in
//! a `RwLock` and callers hold that guard across each operation. `get` runs
//! under the shared guard, so the recency flag is an atomic.

use bytes::Bytes;
use shardkv_common::{Error, Key, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::trace;

/// Smallest capacity for which the second-chance scan is defined
pub const MIN_CAPACITY: usize = 2;

/// Per-shard statistics
#[derive(Debug, Default)]
pub struct ShardStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of new keys admitted
    pub insertions: AtomicU64,
    /// Number of entries evicted to make room
    pub evictions: AtomicU64,
    /// Number of referenced entries rotated to the tail during a scan
    pub second_chances: AtomicU64,
}

impl ShardStats {
    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.insertions.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.second_chances.store(0, Ordering::Relaxed);
    }
}

/// A cached key/value pair with its recency flag
#[derive(Debug)]
struct Entry {
    key: Key,
    value: Bytes,
    referenced: AtomicBool,
}

/// Arena node; `entry` is `None` while the node sits on the free list
#[derive(Debug, Default)]
struct Node {
    entry: Option<Entry>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity associative container with CLOCK eviction
#[derive(Debug)]
pub struct CacheShard {
    /// Position of this shard in its `ShardedCache`
    index: usize,
    /// Maximum number of entries
    capacity: usize,
    /// Key -> arena slot
    map: HashMap<Key, usize>,
    /// Entry storage
    nodes: Vec<Node>,
    /// Unused arena slots
    free: Vec<usize>,
    /// Oldest-inspected entry
    head: Option<usize>,
    /// Most recently admitted or rotated entry
    tail: Option<usize>,
    /// Bumped by every write, delete and clear
    epoch: u64,
    stats: ShardStats,
}

impl CacheShard {
    /// Create an empty shard holding at most `capacity` entries
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_index(0, capacity)
    }

    /// Create an empty shard that knows its position in a sharded cache
    pub fn with_index(index: usize, capacity: usize) -> Result<Self> {
        if capacity < MIN_CAPACITY {
            return Err(Error::CapacityConfig { capacity });
        }

        Ok(Self {
            index,
            capacity,
            map: HashMap::with_capacity(capacity),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: None,
            tail: None,
            epoch: 0,
            stats: ShardStats::default(),
        })
    }

    /// Look up a key, marking it recently used on a hit
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        let entry = self
            .map
            .get(key)
            .and_then(|&idx| self.nodes[idx].entry.as_ref());

        match entry {
            Some(entry) => {
                entry.referenced.store(true, Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.value.clone())
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Err(Error::NotFound)
            }
        }
    }

    /// Insert or overwrite a key, returning the key evicted to make room (if any)
    ///
    /// Overwriting an existing key is a touch: the value is replaced in place,
    /// the recency flag is set and nothing is evicted.
    pub fn put(&mut self, key: Key, value: Bytes) -> Option<Key> {
        self.epoch += 1;

        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.nodes[idx].entry.as_mut() {
                entry.value = value;
                entry.referenced.store(true, Ordering::Relaxed);
            }
            return None;
        }

        self.insert(key, value)
    }

    /// Cache a value read from the store, returning any evicted key
    ///
    /// A key that is already cached is left untouched, and the epoch does not
    /// advance: a fill publishes nothing newer than the store already holds.
    pub fn fill(&mut self, key: Key, value: Bytes) -> Option<Key> {
        if self.map.contains_key(&key) {
            return None;
        }
        self.insert(key, value)
    }

    fn insert(&mut self, key: Key, value: Bytes) -> Option<Key> {
        let evicted = if self.map.len() >= self.capacity {
            self.evict_one()
        } else {
            None
        };

        let idx = self.alloc(Entry {
            key: key.clone(),
            value,
            referenced: AtomicBool::new(false),
        });
        self.link_tail(idx);
        self.map.insert(key, idx);
        self.stats.insertions.fetch_add(1, Ordering::Relaxed);

        evicted
    }

    /// Remove a key
    ///
    /// The epoch advances even when the key is absent: a reader that missed
    /// before this delete must not fill the cache afterwards.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.epoch += 1;
        let idx = self.map.get(key).copied().ok_or(Error::NotFound)?;
        self.remove_node(idx);
        Ok(())
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.epoch += 1;
    }

    /// Check if a key is cached
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Recency flag of a cached key
    pub fn recency_flag(&self, key: &[u8]) -> Option<bool> {
        self.map
            .get(key)
            .and_then(|&idx| self.nodes[idx].entry.as_ref())
            .map(|entry| entry.referenced.load(Ordering::Relaxed))
    }

    /// Keys in scan order, head first
    pub fn scan_order(&self) -> Vec<Key> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = &self.nodes[idx];
            if let Some(entry) = node.entry.as_ref() {
                keys.push(entry.key.clone());
            }
            cursor = node.next;
        }
        keys
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Maximum number of entries
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Position of this shard in its sharded cache
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Mutation counter, bumped by `put`, `delete` and `clear`
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Get shard statistics
    pub const fn stats(&self) -> &ShardStats {
        &self.stats
    }

    /// Run the second-chance scan until one entry is evicted
    ///
    /// Terminates within `len + 1` inspections: every referenced entry has its
    /// flag cleared as it is rotated, so the original head is unreferenced by
    /// the time the scan wraps around to it.
    fn evict_one(&mut self) -> Option<Key> {
        while let Some(idx) = self.head {
            let referenced = self.nodes[idx]
                .entry
                .as_ref()
                .is_some_and(|entry| entry.referenced.swap(false, Ordering::Relaxed));

            if referenced {
                self.unlink(idx);
                self.link_tail(idx);
                self.stats.second_chances.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let victim = self.remove_node(idx);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            if let Some(key) = &victim {
                trace!(shard = self.index, key = %key, "evicted");
            }
            return victim;
        }
        None
    }

    fn alloc(&mut self, entry: Entry) -> usize {
        let node = Node {
            entry: Some(entry),
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Unlink a node, drop it from the map and recycle its slot
    fn remove_node(&mut self, idx: usize) -> Option<Key> {
        self.unlink(idx);
        let entry = self.nodes[idx].entry.take()?;
        self.free.push(idx);
        self.map.remove(&entry.key);
        Some(entry.key)
    }

    fn link_tail(&mut self, idx: usize) {
        self.nodes[idx].prev = self.tail;
        self.nodes[idx].next = None;
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    /// Check that the map and the scan order describe the same entries
    #[cfg(test)]
    fn assert_consistent(&self) {
        let order = self.scan_order();
        assert_eq!(order.len(), self.map.len());
        assert!(self.map.len() <= self.capacity);
        for key in &order {
            assert!(self.map.contains_key(key), "{key:?} in order but not in map");
        }
        let unique: std::collections::HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), order.len(), "duplicate key in scan order");
    }
}
