//! shardkv Storage - Cache, transaction log and store coordination
//!
//! This crate implements the storage tier of a shardkv server including:
//! - Sharded second-chance (CLOCK) cache with caller-held shard locks
//! - Checksummed two-phase commit transaction log with crash recovery
//! - Durable store collaborators (file-per-key and in-memory)
//! - Store coordinator enforcing durable-before-visible writes
//! - Transport-independent request dispatch

pub mod cache;
pub mod coordinator;
pub mod handler;
pub mod store;
pub mod tpc;

// Re-exports
pub use cache::{CacheShard, ShardLock, ShardStats, ShardedCache, ShardedCacheStats};
pub use coordinator::{RecoveryReport, StoreCoordinator, TpcPhase};
pub use handler::{Request, RequestHandler, Response};
pub use store::{DurableStore, FileStore, MemoryStore, StoreLimits};
pub use tpc::{
    FileTransactionLog, LogEntry, LogOptions, LogRecord, LogStats, MemoryTransactionLog, Mutation,
    TransactionLog,
};
