//! Error types for shardkv
//!
//! This module defines the common error type used by the cache, the
//! transaction log, the durable store and the coordinator.

use crate::types::KeyError;
use thiserror::Error;

/// Common result type for shardkv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Response text for a successful request
pub const MSG_SUCCESS: &str = "SUCCESS";

/// Response text when the key is absent
pub const ERRMSG_NO_KEY: &str = "ERROR: no key";

/// Response text for an oversized key
pub const ERRMSG_KEY_LEN: &str = "ERROR: key too long";

/// Response text for an oversized value
pub const ERRMSG_VAL_LEN: &str = "ERROR: value too long";

/// Response text for a malformed or out-of-mode request
pub const ERRMSG_INVALID_REQUEST: &str = "ERROR: invalid request";

/// Response text for every other failure
pub const ERRMSG_GENERIC_ERROR: &str = "ERROR: unable to process request";

/// Common error type for shardkv
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("key not found")]
    NotFound,

    // Admission errors
    #[error("key too long: {len} bytes, max {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("value too long: {len} bytes, max {max}")]
    ValueTooLong { len: usize, max: usize },

    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    // Construction errors
    #[error("cache shard capacity {capacity} is below the minimum of 2")]
    CapacityConfig { capacity: usize },

    // Durability errors
    #[error("durable write failed: {0}")]
    DurableWrite(String),

    #[error("transaction log append failed: {0}")]
    LogAppend(String),

    #[error("transaction log corrupted: {0}")]
    LogCorrupted(String),

    // Two-phase commit protocol errors
    #[error("a transaction is already in flight")]
    TransactionInProgress,

    #[error("two-phase commit is not enabled on this server")]
    TpcDisabled,

    #[error("mutations must be prepared while two-phase commit is enabled")]
    TpcRequired,

    // Ambient errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<KeyError> for Error {
    fn from(e: KeyError) -> Self {
        match e {
            KeyError::TooLong { len, max } => Self::KeyTooLong { len, max },
        }
    }
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a durable write error
    pub fn durable_write(msg: impl Into<String>) -> Self {
        Self::DurableWrite(msg.into())
    }

    /// Create a log append error
    pub fn log_append(msg: impl Into<String>) -> Self {
        Self::LogAppend(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Check if the request was refused before anything was mutated
    #[must_use]
    pub const fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::KeyTooLong { .. } | Self::ValueTooLong { .. } | Self::AdmissionRejected(_)
        )
    }

    /// Check if the error leaves the in-flight operation unable to proceed
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LogAppend(_) | Self::LogCorrupted(_) | Self::CapacityConfig { .. }
        )
    }

    /// Message returned to a client by the request layer
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::NotFound => ERRMSG_NO_KEY,
            Self::KeyTooLong { .. } => ERRMSG_KEY_LEN,
            Self::ValueTooLong { .. } => ERRMSG_VAL_LEN,
            Self::TpcDisabled | Self::TpcRequired | Self::TransactionInProgress => {
                ERRMSG_INVALID_REQUEST
            }
            _ => ERRMSG_GENERIC_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::NotFound.is_not_found());
        assert!(!Error::storage("x").is_not_found());
    }

    #[test]
    fn test_error_admission() {
        assert!(Error::KeyTooLong { len: 2000, max: 1024 }.is_admission());
        assert!(Error::ValueTooLong { len: 2000, max: 1024 }.is_admission());
        assert!(Error::AdmissionRejected("quota".into()).is_admission());
        assert!(!Error::durable_write("disk gone").is_admission());
    }

    #[test]
    fn test_error_fatal() {
        assert!(Error::log_append("fsync").is_fatal());
        assert!(Error::CapacityConfig { capacity: 1 }.is_fatal());
        assert!(!Error::NotFound.is_fatal());
    }

    #[test]
    fn test_client_messages() {
        assert_eq!(Error::NotFound.client_message(), ERRMSG_NO_KEY);
        assert_eq!(
            Error::KeyTooLong { len: 2, max: 1 }.client_message(),
            ERRMSG_KEY_LEN
        );
        assert_eq!(Error::TpcDisabled.client_message(), ERRMSG_INVALID_REQUEST);
        assert_eq!(Error::TpcRequired.client_message(), ERRMSG_INVALID_REQUEST);
        assert_eq!(
            Error::durable_write("x").client_message(),
            ERRMSG_GENERIC_ERROR
        );
    }

    #[test]
    fn test_key_error_conversion() {
        let err: Error = KeyError::TooLong { len: 9, max: 8 }.into();
        assert!(matches!(err, Error::KeyTooLong { len: 9, max: 8 }));
    }
}
