//! Configuration types for shardkv
//!
//! Every field has a default so a partial (or missing) TOML file is valid.

use crate::error::{Error, Result};
use crate::types::{MAX_KEY_LEN, MAX_VALUE_LEN};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for a shardkv server
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server identity and mode
    pub server: ServerConfig,
    /// Cache geometry
    pub cache: CacheConfig,
    /// Key and value limits
    pub limits: LimitsConfig,
    /// Transaction log configuration
    pub log: LogConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, falling back to defaults if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.cache.shard_count == 0 {
            return Err(Error::Configuration("cache.shard_count must be at least 1".into()));
        }
        if self.cache.capacity_per_shard < 2 {
            return Err(Error::CapacityConfig {
                capacity: self.cache.capacity_per_shard,
            });
        }
        if self.limits.max_key_len == 0 || self.limits.max_value_len == 0 {
            return Err(Error::Configuration("limits must be non-zero".into()));
        }
        if self.server.max_threads == 0 {
            return Err(Error::Configuration("server.max_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// Path of the durable store directory
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        self.server.data_dir.join("store")
    }

    /// Path of the transaction log file
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.server.data_dir.join("tpc.log")
    }
}

/// Server identity and operating mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name (human-readable identifier)
    pub name: String,
    /// Host the server advertises
    pub hostname: String,
    /// Port the server advertises
    pub port: u16,
    /// Data directory for the store and the transaction log
    pub data_dir: PathBuf,
    /// Route PUT/DEL through two-phase commit
    pub use_tpc: bool,
    /// Upper bound on concurrently handled requests
    pub max_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "shardkv".to_string(),
            hostname: "localhost".to_string(),
            port: 8162,
            data_dir: PathBuf::from("./shardkv-data"),
            use_tpc: false,
            max_threads: 8,
        }
    }
}

/// Cache geometry, fixed for the lifetime of the server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of independently locked shards
    pub shard_count: usize,
    /// Entries per shard (at least 2)
    pub capacity_per_shard: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: 16,
            capacity_per_shard: 64,
        }
    }
}

/// Key and value size limits
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum key length in bytes
    pub max_key_len: usize,
    /// Maximum value length in bytes
    pub max_value_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_key_len: MAX_KEY_LEN,
            max_value_len: MAX_VALUE_LEN,
        }
    }
}

/// Transaction log configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Sync after every append
    pub sync_on_write: bool,
    /// Buffer size for writes
    pub write_buffer_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            write_buffer_size: 64 * 1024, // 64KB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.name, "shardkv");
        assert_eq!(config.cache.shard_count, 16);
        assert_eq!(config.limits.max_key_len, 1024);
        assert!(config.log.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [server]
            use_tpc = true
            port = 9000

            [cache]
            capacity_per_shard = 4
            "#,
        )
        .unwrap();

        assert!(config.server.use_tpc);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.cache.capacity_per_shard, 4);
        assert_eq!(config.cache.shard_count, 16);
    }

    #[test]
    fn test_capacity_below_minimum() {
        let err = Config::from_toml_str("[cache]\ncapacity_per_shard = 1\n").unwrap_err();
        assert!(matches!(err, Error::CapacityConfig { capacity: 1 }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml_str("[cache\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_paths() {
        let mut config = Config::default();
        config.server.data_dir = PathBuf::from("/srv/kv");
        assert_eq!(config.store_dir(), PathBuf::from("/srv/kv/store"));
        assert_eq!(config.log_path(), PathBuf::from("/srv/kv/tpc.log"));
    }
}
