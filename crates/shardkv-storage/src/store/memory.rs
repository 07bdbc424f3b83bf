//! In-memory store

use super::{DurableStore, StoreLimits};
use bytes::Bytes;
use parking_lot::RwLock;
use shardkv_common::{Error, Key, Result};
use std::collections::HashMap;

/// Store kept in a hash map; nothing survives the process
pub struct MemoryStore {
    entries: RwLock<HashMap<Key, Bytes>>,
    limits: StoreLimits,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &Key) -> Result<Bytes> {
        self.entries.read().get(key).cloned().ok_or(Error::NotFound)
    }

    fn put_check(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.limits.check_entry(key, value)
    }

    fn put(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.limits.check_entry(key, value)?;
        self.entries
            .write()
            .insert(key.clone(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn del_check(&self, key: &Key) -> Result<()> {
        self.limits.check_key(key)?;
        if self.entries.read().contains_key(key) {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    fn del(&self, key: &Key) -> Result<()> {
        self.entries
            .write()
            .remove(key)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }

    fn clean(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}
