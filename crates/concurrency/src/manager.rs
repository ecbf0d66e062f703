//! Transaction manager and status authority
//!
//! Tracks every distributed transaction from begin to its terminal outcome:
//!
//! ```text
//! begin() ──► Pending ──► commit() ──► Committed { commit_time }
//!                   └───► abort()  ──► Aborted { reason }
//! ```
//!
//! The status table is the single authority consulted by change capture.
//! Outcomes are immutable once decided: a second commit or abort of the
//! same transaction is rejected, and a committed transaction reports the
//! same commit time forever.
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Acquire commit lock
//! 2. Check the transaction is still Pending
//! 3. Allocate commit_time from the hybrid clock
//! 4. Record Committed { commit_time } (DECISION POINT)
//! 5. Release commit lock
//! 6. Caller applies the commit on every participant shard
//! ```
//!
//! Between steps 4 and 6 the transaction is committed but not yet visible
//! on its shards. Readers must treat it as unresolved on any shard whose
//! log has not yet received the apply.

use crate::clock::HybridClock;
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{Error, LogPosition, LogicalTimestamp, Result, ShardId, TxnId, TxnOutcome};
use tracing::{debug, warn};

/// State of a transaction in the status table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting writes
    Pending,
    /// Committed at `commit_time`
    Committed {
        /// Global commit time
        commit_time: LogicalTimestamp,
    },
    /// Rolled back
    Aborted {
        /// Human-readable reason
        reason: String,
    },
}

impl TxnState {
    fn outcome(&self) -> TxnOutcome {
        match self {
            TxnState::Pending => TxnOutcome::Pending,
            TxnState::Committed { commit_time } => TxnOutcome::Committed(*commit_time),
            TxnState::Aborted { .. } => TxnOutcome::Aborted,
        }
    }
}

/// Per-transaction bookkeeping
#[derive(Debug, Clone)]
struct TxnRecord {
    state: TxnState,
    /// Participant shards with the position of the first write on each
    participants: SmallVec<[(ShardId, LogPosition); 4]>,
    /// Writes issued so far, per participant (same order as `participants`)
    write_counts: SmallVec<[u32; 4]>,
}

/// Coordinates transaction lifecycle and owns the status table
pub struct TransactionManager {
    clock: Arc<HybridClock>,

    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Status table
    txns: DashMap<TxnId, TxnRecord>,

    /// Commit serialization lock
    ///
    /// Commit-time allocation and the Pending -> Committed transition are
    /// atomic with respect to concurrent aborts of the same transaction.
    commit_lock: Mutex<()>,

    /// Remaining status lookups that fail, for exercising retry paths
    injected_failures: AtomicU32,
}

impl TransactionManager {
    /// Create a manager drawing timestamps from `clock`
    pub fn new(clock: Arc<HybridClock>) -> Self {
        Self::with_txn_id(clock, 0)
    }

    /// Create a manager whose transaction ids start after `max_txn_id`
    pub fn with_txn_id(clock: Arc<HybridClock>, max_txn_id: u64) -> Self {
        TransactionManager {
            clock,
            next_txn_id: AtomicU64::new(max_txn_id + 1),
            txns: DashMap::new(),
            commit_lock: Mutex::new(()),
            injected_failures: AtomicU32::new(0),
        }
    }

    /// Shared clock
    pub fn clock(&self) -> &Arc<HybridClock> {
        &self.clock
    }

    /// Start a transaction
    pub fn begin(&self) -> TxnId {
        let txn = TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.txns.insert(
            txn,
            TxnRecord {
                state: TxnState::Pending,
                participants: SmallVec::new(),
                write_counts: SmallVec::new(),
            },
        );
        txn
    }

    /// Record a write of `txn` on `shard`, returning its per-shard ordinal
    ///
    /// `position` is used as the shard's first-write position when this is
    /// the transaction's first write there.
    pub fn record_write(&self, txn: TxnId, shard: ShardId, position: LogPosition) -> Result<u32> {
        let mut rec = self
            .txns
            .get_mut(&txn)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown {}", txn)))?;
        if rec.state != TxnState::Pending {
            return Err(Error::InvalidArgument(format!("{} is not pending", txn)));
        }
        match rec.participants.iter().position(|(s, _)| *s == shard) {
            Some(i) => {
                let seq = rec.write_counts[i];
                rec.write_counts[i] += 1;
                Ok(seq)
            }
            None => {
                rec.participants.push((shard, position));
                rec.write_counts.push(1);
                Ok(0)
            }
        }
    }

    /// Ordinal the next write of `txn` on `shard` will receive
    pub fn next_write_seq(&self, txn: TxnId, shard: ShardId) -> u32 {
        self.txns
            .get(&txn)
            .and_then(|rec| {
                rec.participants
                    .iter()
                    .position(|(s, _)| *s == shard)
                    .map(|i| rec.write_counts[i])
            })
            .unwrap_or(0)
    }

    /// Participant shards of `txn` with their first-write positions
    pub fn participants(&self, txn: TxnId) -> Vec<(ShardId, LogPosition)> {
        self.txns
            .get(&txn)
            .map(|rec| rec.participants.to_vec())
            .unwrap_or_default()
    }

    /// Decide commit
    ///
    /// Returns the commit time. Fails if the transaction is unknown or
    /// already decided.
    pub fn commit(&self, txn: TxnId) -> Result<LogicalTimestamp> {
        let _commit_guard = self.commit_lock.lock();
        let mut rec = self
            .txns
            .get_mut(&txn)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown {}", txn)))?;
        if rec.state != TxnState::Pending {
            return Err(Error::InvalidArgument(format!(
                "{} already decided: {:?}",
                txn, rec.state
            )));
        }
        let commit_time = self.clock.now();
        rec.state = TxnState::Committed { commit_time };
        debug!(txn = %txn, commit_time = %commit_time, "transaction committed");
        Ok(commit_time)
    }

    /// Decide abort
    pub fn abort(&self, txn: TxnId, reason: impl Into<String>) -> Result<()> {
        let _commit_guard = self.commit_lock.lock();
        let mut rec = self
            .txns
            .get_mut(&txn)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown {}", txn)))?;
        match rec.state {
            TxnState::Pending => {
                let reason = reason.into();
                debug!(txn = %txn, reason = %reason, "transaction aborted");
                rec.state = TxnState::Aborted { reason };
                Ok(())
            }
            TxnState::Aborted { .. } => Ok(()),
            TxnState::Committed { .. } => Err(Error::InvalidArgument(format!(
                "{} already committed",
                txn
            ))),
        }
    }

    /// Current state of `txn`
    pub fn state(&self, txn: TxnId) -> Option<TxnState> {
        self.txns.get(&txn).map(|rec| rec.state.clone())
    }

    /// Outcome lookup served to change capture
    ///
    /// Unknown transactions are reported as aborted: the status table only
    /// forgets a transaction after it has been fully cleaned up.
    pub fn resolve(&self, txn: TxnId) -> Result<TxnOutcome> {
        let failing = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            warn!(txn = %txn, "injected status lookup failure");
            return Err(Error::Storage(format!(
                "status lookup for {} timed out",
                txn
            )));
        }
        Ok(self
            .txns
            .get(&txn)
            .map(|rec| rec.state.outcome())
            .unwrap_or(TxnOutcome::Aborted))
    }

    /// Make the next `count` status lookups fail
    pub fn inject_lookup_failures(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    /// Number of transactions still pending
    pub fn pending_count(&self) -> usize {
        self.txns
            .iter()
            .filter(|r| r.value().state == TxnState::Pending)
            .count()
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .field("txns", &self.txns.len())
            .finish()
    }
}
