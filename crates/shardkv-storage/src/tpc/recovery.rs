//! Folding a replayed log into the transaction state it describes

use super::record::{LogEntry, LogRecord, Mutation};
use shardkv_common::{Error, Result};

/// Transaction state described by the tail of a log
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecoveredState {
    /// Nothing in flight
    Idle,
    /// The last record is an intent with no decision yet
    AwaitingDecision { lsn: u64, mutation: Mutation },
    /// The last decision committed this mutation and no APPLIED marker
    /// follows it; it may not have reached the store
    Committed { lsn: u64, mutation: Mutation },
}

/// Replay `records` in order and report the state they leave behind
///
/// Only the final transaction matters for recovery: earlier committed
/// mutations were applied (or re-applied) before the next intent could be
/// logged, and an APPLIED marker after a COMMIT retires it. A second intent
/// before a decision, a decision with no intent, a marker with no commit, or
/// LSNs that do not increase are reported as `LogCorrupted`.
pub fn recover_state(records: &[LogRecord]) -> Result<RecoveredState> {
    let mut state = RecoveredState::Idle;
    let mut prev_lsn = 0u64;

    for record in records {
        if record.lsn <= prev_lsn {
            return Err(Error::LogCorrupted(format!(
                "lsn {} follows lsn {prev_lsn}",
                record.lsn
            )));
        }
        prev_lsn = record.lsn;

        state = match (state, &record.entry) {
            (RecoveredState::AwaitingDecision { lsn, .. }, entry) if entry.is_intent() => {
                return Err(Error::LogCorrupted(format!(
                    "{} at lsn {} while intent at lsn {lsn} is unresolved",
                    entry.kind(),
                    record.lsn
                )));
            }
            (_, LogEntry::PutIntent { .. } | LogEntry::DelIntent { .. }) => {
                let mutation = record
                    .entry
                    .to_mutation()
                    .ok_or_else(|| Error::internal("intent without a mutation"))?;
                RecoveredState::AwaitingDecision {
                    lsn: record.lsn,
                    mutation,
                }
            }
            (RecoveredState::AwaitingDecision { mutation, .. }, LogEntry::Commit) => {
                RecoveredState::Committed {
                    lsn: record.lsn,
                    mutation,
                }
            }
            (RecoveredState::AwaitingDecision { .. }, LogEntry::Abort) => RecoveredState::Idle,
            (RecoveredState::Committed { .. }, LogEntry::Applied) => RecoveredState::Idle,
            (_, LogEntry::Applied) => {
                return Err(Error::LogCorrupted(format!(
                    "applied at lsn {} with no commit to mark",
                    record.lsn
                )));
            }
            (_, entry) => {
                return Err(Error::LogCorrupted(format!(
                    "{} at lsn {} with no intent in flight",
                    entry.kind(),
                    record.lsn
                )));
            }
        };
    }

    Ok(state)
}
