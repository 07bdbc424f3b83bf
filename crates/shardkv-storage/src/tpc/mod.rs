//! Two-phase commit transaction log
//!
//! A server taking part in two-phase commit logs every mutating request as an
//! intent, then logs the coordinator's decision before acting on it:
//!
//! ```text
//! Idle ──PUT/DEL──► intent appended ──► AwaitingDecision
//!                                          │         │
//!                                       COMMIT     ABORT
//!                                          ▼         ▼
//!                  store + cache ◄── Committed      Idle
//!                        │
//!                        ▼
//!                      Idle
//! ```
//!
//! After a restart the log is replayed and [`recover_state`] reports where in
//! that cycle the server stopped.

mod file;
mod log;
mod record;
mod recovery;

pub use file::{FileTransactionLog, LogOptions};
pub use log::{LogStats, MemoryTransactionLog, TransactionLog};
pub use record::{LogEntry, LogRecord, Mutation};
pub use recovery::{RecoveredState, recover_state};
