//! File-backed transaction log
//!
//! Records are appended as checksummed frames (see [`super::record`]). On
//! open the file is scanned; the first torn or corrupt frame ends the valid
//! prefix and everything after it is truncated away, so later appends always
//! land on a clean frame boundary.

use super::log::{LogStats, TransactionLog};
use super::record::{FRAME_HEADER_SIZE, FRAME_TRAILER_SIZE, IntentTracker, LogEntry, LogRecord};
use parking_lot::Mutex;
use shardkv_common::config::LogConfig;
use shardkv_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Transaction log options
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Sync after every append
    pub sync_on_write: bool,
    /// Buffer size for writes
    pub write_buffer_size: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            write_buffer_size: 64 * 1024, // 64KB
        }
    }
}

impl From<&LogConfig> for LogOptions {
    fn from(config: &LogConfig) -> Self {
        Self {
            sync_on_write: config.sync_on_write,
            write_buffer_size: config.write_buffer_size,
        }
    }
}

struct FileLogState {
    writer: BufWriter<File>,
    /// Bytes of valid frames on disk
    size: u64,
    next_lsn: u64,
    tracker: IntentTracker,
}

/// Result of scanning a log file
struct ScanResult {
    records: Vec<LogRecord>,
    valid_len: u64,
    file_len: u64,
}

/// Durable transaction log stored in a single file
pub struct FileTransactionLog {
    path: PathBuf,
    options: LogOptions,
    state: Mutex<FileLogState>,
    stats: LogStats,
}

impl FileTransactionLog {
    /// Open (or create) the log at `path`
    pub fn open(path: impl AsRef<Path>, options: LogOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let scan = Self::scan(&path)?;

        let file = open_for_append(&path)?;
        if scan.valid_len < scan.file_len {
            warn!(
                path = %path.display(),
                valid = scan.valid_len,
                discarded = scan.file_len - scan.valid_len,
                "truncating torn transaction log tail"
            );
            file.set_len(scan.valid_len)
                .map_err(|e| Error::storage(format!("failed to truncate log: {e}")))?;
            file.sync_all()
                .map_err(|e| Error::storage(format!("failed to sync log: {e}")))?;
        }

        let mut tracker = IntentTracker::default();
        for record in &scan.records {
            tracker.observe(record.lsn, &record.entry);
        }
        let last_lsn = scan.records.last().map_or(0, |r| r.lsn);

        info!(
            path = %path.display(),
            records = scan.records.len(),
            last_lsn,
            "opened transaction log"
        );

        Ok(Self {
            state: Mutex::new(FileLogState {
                writer: BufWriter::with_capacity(options.write_buffer_size, file),
                size: scan.valid_len,
                next_lsn: last_lsn + 1,
                tracker,
            }),
            path,
            options,
            stats: LogStats::default(),
        })
    }

    /// Read every valid frame in the file at `path`
    fn scan(path: &Path) -> Result<ScanResult> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::storage(format!("failed to read log: {e}"))),
        };

        let mut records = Vec::new();
        let mut offset = 0;
        while offset + FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE <= data.len() {
            match LogRecord::from_frame(&data[offset..]) {
                Ok((record, size)) => {
                    records.push(record);
                    offset += size;
                }
                Err(e) => {
                    debug!(offset, error = %e, "log scan stopped");
                    break;
                }
            }
        }

        Ok(ScanResult {
            records,
            valid_len: offset as u64,
            file_len: data.len() as u64,
        })
    }

    /// Drop whatever a failed append left buffered or on disk
    fn rollback(&self, state: &mut FileLogState) -> Result<()> {
        let file = open_for_append(&self.path)?;
        let old = std::mem::replace(
            &mut state.writer,
            BufWriter::with_capacity(self.options.write_buffer_size, file),
        );
        // Discard the buffer rather than letting drop flush it
        let _ = old.into_parts();
        state
            .writer
            .get_ref()
            .set_len(state.size)
            .map_err(|e| Error::storage(format!("failed to roll back log: {e}")))
    }

    fn write_frame(&self, state: &mut FileLogState, frame: &[u8]) -> std::io::Result<()> {
        state.writer.write_all(frame)?;
        state.writer.flush()?;
        if self.options.sync_on_write {
            state.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Current log size in bytes
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionLog for FileTransactionLog {
    fn append(&self, entry: &LogEntry) -> Result<u64> {
        let start = Instant::now();
        let mut state = self.state.lock();

        if let Err(e) = state.tracker.check(entry) {
            self.stats.record_failure();
            return Err(e);
        }

        let lsn = state.next_lsn;
        let frame = LogRecord {
            lsn,
            entry: entry.clone(),
        }
        .to_frame()?;

        if let Err(e) = self.write_frame(&mut state, &frame) {
            self.stats.record_failure();
            if let Err(rollback) = self.rollback(&mut state) {
                warn!(error = %rollback, "log rollback after failed append failed");
            }
            return Err(Error::log_append(format!("{} at lsn {lsn}: {e}", entry.kind())));
        }

        state.size += frame.len() as u64;
        state.next_lsn += 1;
        state.tracker.observe(lsn, entry);
        drop(state);

        self.stats.record_append(frame.len(), start.elapsed());
        debug!(lsn, kind = entry.kind(), bytes = frame.len(), "log append");
        Ok(lsn)
    }

    fn replay(&self) -> Result<Vec<LogRecord>> {
        // Hold the lock so no append lands mid-read
        let _state = self.state.lock();
        Ok(Self::scan(&self.path)?.records)
    }

    fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        state
            .writer
            .flush()
            .map_err(|e| Error::storage(format!("log flush failed: {e}")))?;
        let file = state.writer.get_ref();
        file.set_len(0)
            .map_err(|e| Error::storage(format!("failed to reset log: {e}")))?;
        file.sync_all()
            .map_err(|e| Error::storage(format!("log sync failed: {e}")))?;

        state.size = 0;
        state.next_lsn = 1;
        state.tracker = IntentTracker::default();
        info!(path = %self.path.display(), "transaction log reset");
        Ok(())
    }

    fn last_lsn(&self) -> u64 {
        self.state.lock().next_lsn - 1
    }

    fn stats(&self) -> &LogStats {
        &self.stats
    }
}

fn open_for_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::storage(format!("failed to open log {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkv_common::Key;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn put_intent(k: &str, v: &str) -> LogEntry {
        LogEntry::PutIntent {
            key: Key::from(k),
            value: v.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpc.log");

        {
            let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
            assert_eq!(log.append(&put_intent("a", "1")).unwrap(), 1);
            assert_eq!(log.append(&LogEntry::Commit).unwrap(), 2);
            assert_eq!(log.append(&LogEntry::DelIntent { key: Key::from("a") }).unwrap(), 3);
            assert_eq!(log.stats().appends.load(Ordering::Relaxed), 3);
        }

        let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
        assert_eq!(log.last_lsn(), 3);

        let records = log.replay().unwrap();
        let entries: Vec<_> = records.iter().map(|r| r.entry.clone()).collect();
        assert_eq!(
            entries,
            vec![
                put_intent("a", "1"),
                LogEntry::Commit,
                LogEntry::DelIntent { key: Key::from("a") },
            ]
        );

        // The reopened log remembers the unresolved intent
        assert!(matches!(
            log.append(&put_intent("b", "2")),
            Err(Error::Internal(_))
        ));
        assert_eq!(log.append(&LogEntry::Abort).unwrap(), 4);
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpc.log");

        let full_size = {
            let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
            log.append(&put_intent("a", "1")).unwrap();
            log.append(&LogEntry::Commit).unwrap();
            log.size()
        };

        // Simulate a crash halfway through the next frame
        let torn = LogRecord {
            lsn: 3,
            entry: put_intent("b", "2"),
        }
        .to_frame()
        .unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&torn[..torn.len() / 2]).unwrap();
        }
        assert!(std::fs::metadata(&path).unwrap().len() > full_size);

        let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), full_size);
        assert_eq!(log.replay().unwrap().len(), 2);

        // New appends start on a clean boundary
        assert_eq!(log.append(&put_intent("b", "2")).unwrap(), 3);
        drop(log);
        let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
        assert_eq!(log.replay().unwrap().len(), 3);
    }

    #[test]
    fn test_corrupt_frame_ends_valid_prefix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpc.log");

        let first_size = {
            let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
            log.append(&put_intent("a", "1")).unwrap();
            let size = log.size();
            log.append(&LogEntry::Abort).unwrap();
            size
        };

        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
        assert_eq!(log.size(), first_size);
        assert_eq!(log.last_lsn(), 1);
        assert!(log.replay().unwrap()[0].entry.is_intent());
    }

    #[test]
    fn test_reset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tpc.log");

        let log = FileTransactionLog::open(&path, LogOptions::default()).unwrap();
        log.append(&put_intent("a", "1")).unwrap();
        log.reset().unwrap();

        assert_eq!(log.last_lsn(), 0);
        assert_eq!(log.size(), 0);
        assert!(log.replay().unwrap().is_empty());
        assert_eq!(log.append(&put_intent("b", "2")).unwrap(), 1);
    }

    #[test]
    fn test_unsynced_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tpc.log");
        let options = LogOptions {
            sync_on_write: false,
            write_buffer_size: 128,
        };

        let log = FileTransactionLog::open(&path, options).unwrap();
        log.append(&put_intent("a", &"x".repeat(512))).unwrap();
        assert_eq!(log.replay().unwrap().len(), 1);
        assert_eq!(log.path(), path.as_path());
    }
}
