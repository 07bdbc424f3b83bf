//! Transaction log contract and the in-memory implementation

use super::record::{IntentTracker, LogEntry, LogRecord};
use parking_lot::Mutex;
use shardkv_common::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Append-only, replayable record of in-flight mutations
///
/// `append` must not return until the record is durable. At most one intent
/// may be unresolved at a time; appending a second intent (or a decision with
/// no intent) is refused with `Error::Internal`.
pub trait TransactionLog: Send + Sync {
    /// Durably append an entry, returning its LSN
    fn append(&self, entry: &LogEntry) -> Result<u64>;

    /// Every record in log order
    fn replay(&self) -> Result<Vec<LogRecord>>;

    /// Discard every record
    fn reset(&self) -> Result<()>;

    /// LSN of the most recent record (0 if empty)
    fn last_lsn(&self) -> u64;

    /// Append statistics
    fn stats(&self) -> &LogStats;
}

impl<T: TransactionLog + ?Sized> TransactionLog for Arc<T> {
    fn append(&self, entry: &LogEntry) -> Result<u64> {
        (**self).append(entry)
    }

    fn replay(&self) -> Result<Vec<LogRecord>> {
        (**self).replay()
    }

    fn reset(&self) -> Result<()> {
        (**self).reset()
    }

    fn last_lsn(&self) -> u64 {
        (**self).last_lsn()
    }

    fn stats(&self) -> &LogStats {
        (**self).stats()
    }
}

/// Append statistics for backpressure monitoring
#[derive(Debug, Default)]
pub struct LogStats {
    /// Number of successful appends
    pub appends: AtomicU64,
    /// Bytes written by successful appends
    pub bytes_written: AtomicU64,
    /// Number of failed appends
    pub failures: AtomicU64,
    /// Sum of append latencies in microseconds
    pub total_append_micros: AtomicU64,
    /// Slowest append in microseconds
    pub max_append_micros: AtomicU64,
}

impl LogStats {
    /// Account for one successful append
    pub fn record_append(&self, bytes: usize, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.total_append_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_append_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Account for one failed append
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean append latency in microseconds
    pub fn mean_append_micros(&self) -> f64 {
        let appends = self.appends.load(Ordering::Relaxed);
        if appends == 0 {
            return 0.0;
        }
        self.total_append_micros.load(Ordering::Relaxed) as f64 / appends as f64
    }
}

struct MemoryLogState {
    records: Vec<LogRecord>,
    tracker: IntentTracker,
}

/// Non-durable transaction log kept in memory
///
/// Shares the file log's ordering and intent rules; useful for tests and for
/// embedding a coordinator whose crash safety is provided elsewhere.
pub struct MemoryTransactionLog {
    state: Mutex<MemoryLogState>,
    stats: LogStats,
}

impl Default for MemoryTransactionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransactionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryLogState {
                records: Vec::new(),
                tracker: IntentTracker::default(),
            }),
            stats: LogStats::default(),
        }
    }

    /// Create a log that already holds `entries` (LSNs assigned from 1)
    ///
    /// The intent rule is not enforced on the seeded entries, so a damaged
    /// history can be reproduced.
    pub fn with_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let log = Self::new();
        {
            let mut state = log.state.lock();
            for entry in entries {
                let lsn = state.records.len() as u64 + 1;
                state.tracker.observe(lsn, &entry);
                state.records.push(LogRecord { lsn, entry });
            }
        }
        log
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn append(&self, entry: &LogEntry) -> Result<u64> {
        let mut state = self.state.lock();
        if let Err(e) = state.tracker.check(entry) {
            self.stats.record_failure();
            return Err(e);
        }

        let lsn = state.records.last().map_or(1, |r| r.lsn + 1);
        state.tracker.observe(lsn, entry);
        state.records.push(LogRecord {
            lsn,
            entry: entry.clone(),
        });
        self.stats.record_append(0, Duration::ZERO);
        Ok(lsn)
    }

    fn replay(&self) -> Result<Vec<LogRecord>> {
        Ok(self.state.lock().records.clone())
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.records.clear();
        state.tracker = IntentTracker::default();
        Ok(())
    }

    fn last_lsn(&self) -> u64 {
        self.state.lock().records.last().map_or(0, |r| r.lsn)
    }

    fn stats(&self) -> &LogStats {
        &self.stats
    }
}
