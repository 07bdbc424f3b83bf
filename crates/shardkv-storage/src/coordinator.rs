//! Store coordinator
//!
//! Orchestrates reads and mutations across the sharded cache and the durable
//! store:
//!
//! - **read**: cache first under the shard's shared guard; on a miss the guard
//!   is released, the store is read, and the value is filled into the cache
//!   under the exclusive guard unless a write or delete reached the shard in
//!   between. Fills by other readers do not cancel it.
//! - **write**: admission checks, then the store write and the cache update
//!   under one exclusive guard. A value is cached only after it is durable.
//! - **delete**: cache removal and store removal under one exclusive guard.
//!
//! With two-phase commit enabled, mutations are instead prepared (an intent
//! is logged and a vote returned) and applied only once a COMMIT decision has
//! been logged.

use crate::cache::{ShardedCache, ShardedCacheStats};
use crate::store::{DurableStore, StoreLimits};
use crate::tpc::{
    LogEntry, MemoryTransactionLog, Mutation, RecoveredState, TransactionLog, recover_state,
};
use bytes::Bytes;
use parking_lot::Mutex;
use shardkv_common::{Config, Error, Key, Result, ServerId, ServerInfo};
use tracing::{debug, error, info, warn};

/// Two-phase commit state of a coordinator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TpcPhase {
    /// No transaction in flight
    #[default]
    Idle,
    /// An intent is logged and waits for COMMIT or ABORT
    AwaitingDecision(Mutation),
    /// COMMIT is logged but the mutation has not reached the store yet
    Committed(Mutation),
}

impl TpcPhase {
    /// Check if no transaction is in flight
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// The in-flight mutation, if any
    pub const fn mutation(&self) -> Option<&Mutation> {
        match self {
            Self::Idle => None,
            Self::AwaitingDecision(m) | Self::Committed(m) => Some(m),
        }
    }
}

/// What `rebuild_state` found in the log
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of log records replayed
    pub records_replayed: usize,
    /// LSN of the last replayed record
    pub last_lsn: u64,
    /// Intent restored into the awaiting-decision state
    pub pending: Option<Mutation>,
    /// Committed mutation re-applied to the store
    pub reapplied: Option<Mutation>,
}

/// Identity reported by `get_info`
#[derive(Clone, Debug)]
struct Identity {
    server_id: ServerId,
    name: String,
    hostname: String,
    port: u16,
}

struct TpcState<L> {
    log: L,
    phase: Mutex<TpcPhase>,
}

/// Coordinates the sharded cache, the durable store and the transaction log
pub struct StoreCoordinator<S, L = MemoryTransactionLog> {
    identity: Identity,
    limits: StoreLimits,
    cache: ShardedCache,
    store: S,
    tpc: Option<TpcState<L>>,
}

impl<S: DurableStore> StoreCoordinator<S> {
    /// Build a coordinator that applies mutations directly
    pub fn new(config: &Config, store: S) -> Result<Self> {
        Self::build(config, store, None)
    }
}

impl<S: DurableStore, L: TransactionLog> StoreCoordinator<S, L> {
    /// Build a coordinator that routes mutations through two-phase commit
    ///
    /// Call [`rebuild_state`](Self::rebuild_state) before serving requests.
    pub fn with_tpc(config: &Config, store: S, log: L) -> Result<Self> {
        Self::build(
            config,
            store,
            Some(TpcState {
                log,
                phase: Mutex::new(TpcPhase::Idle),
            }),
        )
    }

    fn build(config: &Config, store: S, tpc: Option<TpcState<L>>) -> Result<Self> {
        config.validate()?;
        let cache = ShardedCache::new(config.cache.shard_count, config.cache.capacity_per_shard)?;

        info!(
            name = %config.server.name,
            shards = config.cache.shard_count,
            capacity_per_shard = config.cache.capacity_per_shard,
            tpc = tpc.is_some(),
            "store coordinator ready"
        );

        Ok(Self {
            identity: Identity {
                server_id: ServerId::new(),
                name: config.server.name.clone(),
                hostname: config.server.hostname.clone(),
                port: config.server.port,
            },
            limits: StoreLimits::from(&config.limits),
            cache,
            store,
            tpc,
        })
    }

    // ---- Direct operations ----

    /// Read a value, filling the cache from the store on a miss
    pub fn read(&self, key: &Key) -> Result<Bytes> {
        self.limits.check_key(key)?;
        let lock = self.cache.lock_for(key.as_bytes());

        let epoch = {
            let guard = lock.read();
            match self.cache.get(&guard, key.as_bytes()) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_not_found() => guard.epoch(),
                Err(e) => return Err(e),
            }
        };

        let value = self.store.get(key)?;

        let mut guard = lock.write();
        if guard.epoch() != epoch {
            debug!(key = %key, "shard written during store read, skipping cache fill");
            return Ok(value);
        }
        match self.cache.fill(&mut guard, key.clone(), value.clone()) {
            Ok(evicted) => debug!(key = %key, evicted = ?evicted, "cache fill"),
            Err(e) => warn!(key = %key, error = %e, "cache fill failed"),
        }
        Ok(value)
    }

    /// Durably store a value, then make it visible in the cache
    ///
    /// Refused with `TpcRequired` when two-phase commit is enabled; those
    /// mutations go through [`prepare_put`](Self::prepare_put).
    pub fn write(&self, key: &Key, value: Bytes) -> Result<()> {
        self.direct_allowed()?;
        self.limits.check_key(key)?;
        self.store.put_check(key, &value)?;
        self.apply_put(key, value)
    }

    /// Remove a key from the cache and the store
    pub fn delete(&self, key: &Key) -> Result<()> {
        self.direct_allowed()?;
        self.limits.check_key(key)?;
        self.apply_delete(key)
    }

    /// Describe this server
    pub fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_id: self.identity.server_id,
            name: self.identity.name.clone(),
            hostname: self.identity.hostname.clone(),
            port: self.identity.port,
            use_tpc: self.tpc.is_some(),
            reported_at: ServerInfo::now_secs(),
        }
    }

    const fn direct_allowed(&self) -> Result<()> {
        if self.tpc.is_some() {
            return Err(Error::TpcRequired);
        }
        Ok(())
    }

    fn apply_put(&self, key: &Key, value: Bytes) -> Result<()> {
        let mut guard = self.cache.lock_for(key.as_bytes()).write();
        self.store.put(key, &value)?;
        if let Some(evicted) = self.cache.put(&mut guard, key.clone(), value)? {
            debug!(key = %key, evicted = %evicted, "cache eviction");
        }
        Ok(())
    }

    fn apply_delete(&self, key: &Key) -> Result<()> {
        let mut guard = self.cache.lock_for(key.as_bytes()).write();
        match self.cache.delete(&mut guard, key.as_bytes()) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.store.del(key)
    }

    // ---- Two-phase commit ----

    fn tpc(&self) -> Result<&TpcState<L>> {
        self.tpc.as_ref().ok_or(Error::TpcDisabled)
    }

    /// Check if mutations go through two-phase commit
    pub const fn is_tpc(&self) -> bool {
        self.tpc.is_some()
    }

    /// Current two-phase commit phase (always idle without two-phase commit)
    pub fn tpc_phase(&self) -> TpcPhase {
        self.tpc
            .as_ref()
            .map_or(TpcPhase::Idle, |tpc| tpc.phase.lock().clone())
    }

    /// Validate a PUT and log its intent, returning the intent's LSN
    ///
    /// An admission failure is returned without logging anything; the caller
    /// votes ABORT.
    pub fn prepare_put(&self, key: &Key, value: Bytes) -> Result<u64> {
        self.limits.check_key(key)?;
        self.prepare(Mutation::Put {
            key: key.clone(),
            value,
        })
    }

    /// Validate a DEL and log its intent, returning the intent's LSN
    pub fn prepare_delete(&self, key: &Key) -> Result<u64> {
        self.limits.check_key(key)?;
        self.prepare(Mutation::Delete { key: key.clone() })
    }

    fn prepare(&self, mutation: Mutation) -> Result<u64> {
        let tpc = self.tpc()?;
        let mut phase = tpc.phase.lock();

        // Finish any committed mutation before admitting the next one
        self.settle(&mut phase)?;
        if !phase.is_idle() {
            return Err(Error::TransactionInProgress);
        }

        match &mutation {
            Mutation::Put { key, value } => self.store.put_check(key, value)?,
            Mutation::Delete { key } => self.store.del_check(key)?,
        }

        let lsn = tpc.log.append(&mutation.to_intent())?;
        info!(lsn, key = %mutation.key(), "intent logged, voting commit");
        *phase = TpcPhase::AwaitingDecision(mutation);
        Ok(lsn)
    }

    /// Log COMMIT and apply the pending mutation
    ///
    /// Returns the COMMIT record's LSN, or `None` when there was nothing to
    /// log (a resent decision, or a retry of an earlier failed apply).
    pub fn commit(&self) -> Result<Option<u64>> {
        let tpc = self.tpc()?;
        let mut phase = tpc.phase.lock();

        let mutation = match &*phase {
            TpcPhase::Idle => {
                debug!("commit with no transaction in flight acknowledged");
                return Ok(None);
            }
            TpcPhase::Committed(_) => {
                self.settle(&mut phase)?;
                return Ok(None);
            }
            TpcPhase::AwaitingDecision(mutation) => mutation.clone(),
        };

        let lsn = tpc.log.append(&LogEntry::Commit)?;
        info!(lsn, key = %mutation.key(), "commit logged");
        *phase = TpcPhase::Committed(mutation);
        self.settle(&mut phase)?;
        Ok(Some(lsn))
    }

    /// Log ABORT and discard the pending mutation
    pub fn abort(&self) -> Result<Option<u64>> {
        let tpc = self.tpc()?;
        let mut phase = tpc.phase.lock();

        match &*phase {
            TpcPhase::Idle => {
                debug!("abort with no transaction in flight acknowledged");
                Ok(None)
            }
            TpcPhase::Committed(mutation) => {
                warn!(key = %mutation.key(), "abort received after commit was logged, ignoring");
                self.settle(&mut phase)?;
                Ok(None)
            }
            TpcPhase::AwaitingDecision(mutation) => {
                let lsn = tpc.log.append(&LogEntry::Abort)?;
                info!(lsn, key = %mutation.key(), "abort logged");
                *phase = TpcPhase::Idle;
                Ok(Some(lsn))
            }
        }
    }

    /// Apply a committed mutation and mark it applied, returning to idle
    ///
    /// A lost APPLIED marker is only logged: the store already holds the
    /// mutation, and the next intent or marker retires the COMMIT on replay.
    fn settle(&self, phase: &mut TpcPhase) -> Result<()> {
        let TpcPhase::Committed(mutation) = &*phase else {
            return Ok(());
        };
        let tpc = self.tpc()?;

        let result = match mutation {
            Mutation::Put { key, value } => self.apply_put(key, value.clone()),
            Mutation::Delete { key } => match self.apply_delete(key) {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            },
        };

        match result {
            Ok(()) => {
                match tpc.log.append(&LogEntry::Applied) {
                    Ok(lsn) => debug!(lsn, key = %mutation.key(), "committed mutation applied"),
                    Err(e) => warn!(
                        key = %mutation.key(),
                        error = %e,
                        "committed mutation applied but the marker was not logged"
                    ),
                }
                *phase = TpcPhase::Idle;
                Ok(())
            }
            Err(e) => {
                error!(key = %mutation.key(), error = %e, "failed to apply committed mutation");
                Err(e)
            }
        }
    }

    /// Restore the transaction state recorded in the log
    ///
    /// An unmatched intent puts the coordinator back into the awaiting-decision
    /// state for that exact mutation. A COMMIT with no APPLIED marker after it
    /// is re-applied to the store before this returns; one already marked is
    /// left alone.
    pub fn rebuild_state(&self) -> Result<RecoveryReport> {
        let Some(tpc) = &self.tpc else {
            return Ok(RecoveryReport::default());
        };

        let mut phase = tpc.phase.lock();
        let records = tpc.log.replay()?;
        let mut report = RecoveryReport {
            records_replayed: records.len(),
            last_lsn: records.last().map_or(0, |r| r.lsn),
            ..RecoveryReport::default()
        };

        match recover_state(&records)? {
            RecoveredState::Idle => *phase = TpcPhase::Idle,
            RecoveredState::AwaitingDecision { lsn, mutation } => {
                info!(lsn, key = %mutation.key(), "restored pending intent, awaiting decision");
                report.pending = Some(mutation.clone());
                *phase = TpcPhase::AwaitingDecision(mutation);
            }
            RecoveredState::Committed { lsn, mutation } => {
                info!(lsn, key = %mutation.key(), "re-applying committed mutation");
                report.reapplied = Some(mutation.clone());
                *phase = TpcPhase::Committed(mutation);
                self.settle(&mut phase)?;
            }
        }

        info!(
            records = report.records_replayed,
            last_lsn = report.last_lsn,
            "state rebuilt from transaction log"
        );
        Ok(report)
    }

    /// Wipe the store, the cache and the transaction log
    pub fn clean(&self) -> Result<()> {
        let phase = self.tpc.as_ref().map(|tpc| tpc.phase.lock());

        self.store.clean()?;
        self.cache.clear();
        if let (Some(tpc), Some(mut phase)) = (&self.tpc, phase) {
            tpc.log.reset()?;
            *phase = TpcPhase::Idle;
        }

        info!("store, cache and transaction log cleaned");
        Ok(())
    }

    // ---- Accessors ----

    /// Aggregate cache statistics
    pub fn cache_stats(&self) -> ShardedCacheStats {
        self.cache.stats()
    }

    /// The sharded cache
    pub const fn cache(&self) -> &ShardedCache {
        &self.cache
    }

    /// The durable store
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The transaction log, if two-phase commit is enabled
    pub fn log(&self) -> Option<&L> {
        self.tpc.as_ref().map(|tpc| &tpc.log)
    }
}
