//! Transaction log records and their on-disk framing
//!
//! Frame format:
//! ```text
//! +--------+------+--------+-----------------+--------+
//! | Magic  | LSN  | Length | bincode(entry)  | CRC32C |
//! | 4B     | 8B   | 4B     | var             | 4B     |
//! +--------+------+--------+-----------------+--------+
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shardkv_common::{Error, Key, Result};

/// Frame magic number
const FRAME_MAGIC: u32 = 0x4B_56_54_4C; // "KVTL"

/// Frame header size (magic + lsn + length)
pub(crate) const FRAME_HEADER_SIZE: usize = 16;

/// Frame trailer size (crc)
pub(crate) const FRAME_TRAILER_SIZE: usize = 4;

/// A mutation waiting for (or having received) a two-phase-commit decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Store `value` under `key`
    Put { key: Key, value: Bytes },
    /// Remove `key`
    Delete { key: Key },
}

impl Mutation {
    /// Key the mutation applies to
    pub const fn key(&self) -> &Key {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Intent record for this mutation
    pub fn to_intent(&self) -> LogEntry {
        match self {
            Self::Put { key, value } => LogEntry::PutIntent {
                key: key.clone(),
                value: value.to_vec(),
            },
            Self::Delete { key } => LogEntry::DelIntent { key: key.clone() },
        }
    }
}

/// One entry of the transaction log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A PUT was prepared and voted ready
    PutIntent { key: Key, value: Vec<u8> },
    /// A DEL was prepared and voted ready
    DelIntent { key: Key },
    /// The in-flight intent was committed
    Commit,
    /// The in-flight intent was aborted
    Abort,
    /// The last committed mutation reached the store
    Applied,
}

impl LogEntry {
    /// Check if this entry opens a transaction
    pub const fn is_intent(&self) -> bool {
        matches!(self, Self::PutIntent { .. } | Self::DelIntent { .. })
    }

    /// Check if this entry closes a transaction
    pub const fn is_decision(&self) -> bool {
        matches!(self, Self::Commit | Self::Abort)
    }

    /// The mutation an intent describes
    pub fn to_mutation(&self) -> Option<Mutation> {
        match self {
            Self::PutIntent { key, value } => Some(Mutation::Put {
                key: key.clone(),
                value: Bytes::copy_from_slice(value),
            }),
            Self::DelIntent { key } => Some(Mutation::Delete { key: key.clone() }),
            Self::Commit | Self::Abort | Self::Applied => None,
        }
    }

    /// Short name for logging
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PutIntent { .. } => "put-intent",
            Self::DelIntent { .. } => "del-intent",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Applied => "applied",
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::storage(format!("failed to encode log entry: {e}")))
    }

    /// Deserialize from bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }
}

/// A log entry with its sequence number
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Log Sequence Number
    pub lsn: u64,
    /// The logged entry
    pub entry: LogEntry,
}

impl LogRecord {
    /// Serialize to a checksummed frame
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let data = self.entry.to_bytes()?;
        let len = u32::try_from(data.len())
            .map_err(|_| Error::storage("log entry exceeds 4 GiB"))?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + data.len() + FRAME_TRAILER_SIZE);
        buf.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&data);

        // CRC over everything except the CRC itself
        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Parse one frame from the front of `data`, returning it and its size
    pub fn from_frame(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE {
            return Err(Error::storage("log frame too small"));
        }

        if le_u32(&data[0..4]) != FRAME_MAGIC {
            return Err(Error::storage("invalid log frame magic"));
        }

        let lsn = le_u64(&data[4..12]);
        let data_len = le_u32(&data[12..16]) as usize;

        let body_end = FRAME_HEADER_SIZE + data_len;
        let total_size = body_end + FRAME_TRAILER_SIZE;
        if data.len() < total_size {
            return Err(Error::storage("log frame truncated"));
        }

        let stored_crc = le_u32(&data[body_end..total_size]);
        if crc32c::crc32c(&data[..body_end]) != stored_crc {
            return Err(Error::storage("log frame CRC mismatch"));
        }

        let entry = LogEntry::from_bytes(&data[FRAME_HEADER_SIZE..body_end])
            .ok_or_else(|| Error::storage("undecodable log entry"))?;

        Ok((Self { lsn, entry }, total_size))
    }
}

/// Tracks the single unresolved intent a log may hold, and whether the
/// last COMMIT still waits for its APPLIED marker
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct IntentTracker {
    open: Option<u64>,
    unapplied_commit: bool,
}

impl IntentTracker {
    /// LSN of the unresolved intent, if any
    pub(crate) const fn open_intent(&self) -> Option<u64> {
        self.open
    }

    /// Refuse appends that would break the one-intent-in-flight rule
    pub(crate) fn check(&self, entry: &LogEntry) -> Result<()> {
        if matches!(entry, LogEntry::Applied) {
            return if self.unapplied_commit {
                Ok(())
            } else {
                Err(Error::internal("applied appended with no commit to mark"))
            };
        }
        match (self.open, entry.is_intent()) {
            (Some(lsn), true) => Err(Error::internal(format!(
                "{} appended while intent at lsn {lsn} is unresolved",
                entry.kind()
            ))),
            (None, false) => Err(Error::internal(format!(
                "{} appended with no intent in flight",
                entry.kind()
            ))),
            _ => Ok(()),
        }
    }

    /// Account for an entry that made it into the log
    pub(crate) fn observe(&mut self, lsn: u64, entry: &LogEntry) {
        self.open = entry.is_intent().then_some(lsn);
        self.unapplied_commit = matches!(entry, LogEntry::Commit);
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
