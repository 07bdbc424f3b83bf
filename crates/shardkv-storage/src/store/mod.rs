//! Durable key-value store behind the cache
//!
//! The coordinator only talks to the store through [`DurableStore`]. The
//! `*_check` operations validate a mutation without performing it, so a
//! request can be refused (or voted down) before anything is touched.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use bytes::Bytes;
use shardkv_common::config::LimitsConfig;
use shardkv_common::{Error, Key, Result};
use std::sync::Arc;

/// Persistent key-value layer
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &Key) -> Result<Bytes>;

    /// Check that `put(key, value)` would be admitted
    fn put_check(&self, key: &Key, value: &[u8]) -> Result<()>;

    /// Durably store `value` under `key`
    fn put(&self, key: &Key, value: &[u8]) -> Result<()>;

    /// Check that `del(key)` would be admitted
    fn del_check(&self, key: &Key) -> Result<()>;

    /// Remove `key`
    fn del(&self, key: &Key) -> Result<()>;

    /// Wipe all persisted state
    fn clean(&self) -> Result<()>;
}

impl<T: DurableStore + ?Sized> DurableStore for Arc<T> {
    fn get(&self, key: &Key) -> Result<Bytes> {
        (**self).get(key)
    }

    fn put_check(&self, key: &Key, value: &[u8]) -> Result<()> {
        (**self).put_check(key, value)
    }

    fn put(&self, key: &Key, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn del_check(&self, key: &Key) -> Result<()> {
        (**self).del_check(key)
    }

    fn del(&self, key: &Key) -> Result<()> {
        (**self).del(key)
    }

    fn clean(&self) -> Result<()> {
        (**self).clean()
    }
}

/// Size limits enforced by store admission checks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum key length in bytes
    pub max_key_len: usize,
    /// Maximum value length in bytes
    pub max_value_len: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for StoreLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_key_len: config.max_key_len,
            max_value_len: config.max_value_len,
        }
    }
}

impl StoreLimits {
    /// Reject keys over the limit
    pub fn check_key(&self, key: &Key) -> Result<()> {
        Ok(key.validate(self.max_key_len)?)
    }

    /// Reject a key or value over the limit
    pub fn check_entry(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        if value.len() > self.max_value_len {
            return Err(Error::ValueTooLong {
                len: value.len(),
                max: self.max_value_len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits() {
        let limits = StoreLimits {
            max_key_len: 4,
            max_value_len: 8,
        };

        assert!(limits.check_entry(&Key::from("abcd"), b"12345678").is_ok());
        assert!(matches!(
            limits.check_key(&Key::from("abcde")),
            Err(Error::KeyTooLong { len: 5, max: 4 })
        ));
        assert!(matches!(
            limits.check_entry(&Key::from("a"), b"123456789"),
            Err(Error::ValueTooLong { len: 9, max: 8 })
        ));
    }

    #[test]
    fn test_arc_store_delegates() {
        let store = Arc::new(MemoryStore::new(StoreLimits::default()));
        let shared: Arc<MemoryStore> = Arc::clone(&store);

        shared.put(&Key::from("k"), b"v").unwrap();
        assert_eq!(store.get(&Key::from("k")).unwrap(), Bytes::from_static(b"v"));
    }
}
