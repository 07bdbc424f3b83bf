//! Core type definitions for shardkv
//!
//! Keys are opaque byte strings bounded by a configurable maximum length;
//! values travel as `bytes::Bytes` in the storage crate and are not typed here.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Default maximum key length in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Default maximum value length in bytes
pub const MAX_VALUE_LEN: usize = 1024;

/// A cache/store key
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key without a length check
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Create a key, rejecting it if it exceeds `max_len` bytes
    pub fn checked(bytes: impl Into<Vec<u8>>, max_len: usize) -> Result<Self, KeyError> {
        let key = Self::new(bytes);
        key.validate(max_len)?;
        Ok(key)
    }

    /// Check the key against a maximum length
    pub fn validate(&self, max_len: usize) -> Result<(), KeyError> {
        if self.0.len() > max_len {
            return Err(KeyError::TooLong {
                len: self.0.len(),
                max: max_len,
            });
        }
        Ok(())
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume the key, returning its bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Self(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Self(b)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Errors that can occur when validating a key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key cannot exceed {max} bytes (got {len})")]
    TooLong { len: usize, max: usize },
}

/// Unique identifier for a server instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct ServerId(Uuid);

impl ServerId {
    /// Generate a new random server ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerId({})", self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic description of a server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Identity of this server instance
    pub server_id: ServerId,
    /// Human-readable name
    pub name: String,
    /// Host the server is reachable at
    pub hostname: String,
    /// Port the server is reachable at
    pub port: u16,
    /// Whether mutating requests go through two-phase commit
    pub use_tpc: bool,
    /// Time the info was produced (unix seconds)
    pub reported_at: u64,
}

impl ServerInfo {
    /// Current time in unix seconds
    #[must_use]
    pub fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{{}, {}}}", self.reported_at, self.hostname, self.port)
    }
}
