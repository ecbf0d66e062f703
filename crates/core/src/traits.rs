//! Interfaces consumed from the storage engine
//!
//! Change capture never owns shard data. It reads it through these narrow
//! traits, which a storage engine implements:
//!
//! - [`ShardLogReader`]: ordered reads of a shard's replicated log
//! - [`TransactionResolver`]: transaction outcome authority
//! - [`ShardTopology`]: shard existence, split lineage, reclamation
//! - [`LeaderEpochs`]: leader epoch per shard, for fencing stale writers
//! - [`CommitObserver`]: callback run on the commit-apply path
//!
//! [`StorageEngine`] bundles them.

use crate::error::Result;
use crate::log::LogEntry;
use crate::position::{LogPosition, LogicalTimestamp};
use crate::types::{ShardId, TxnId};
use std::sync::Weak;

/// Outcome of a transaction as reported by the status authority
///
/// Commit and abort are terminal: once reported, an outcome never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Not yet decided
    Pending,
    /// Committed at the given time
    Committed(LogicalTimestamp),
    /// Rolled back
    Aborted,
}

impl TxnOutcome {
    /// Whether the outcome is terminal
    pub fn is_resolved(&self) -> bool {
        !matches!(self, TxnOutcome::Pending)
    }
}

/// Ordered reads of a shard's log
pub trait ShardLogReader: Send + Sync {
    /// Read up to `max_entries` entries strictly after `from`, in log order
    ///
    /// Returns `Error::ShardNotFound` for unknown or reclaimed shards.
    fn read_log(&self, shard: ShardId, from: LogPosition, max_entries: usize)
        -> Result<Vec<LogEntry>>;
}

/// Transaction outcome authority
pub trait TransactionResolver: Send + Sync {
    /// Current outcome of `txn`
    ///
    /// May fail transiently (e.g. status shard unavailable); callers retry.
    fn resolve_transaction(&self, txn: TxnId) -> Result<TxnOutcome>;
}

/// Shard lifecycle and split lineage
pub trait ShardTopology: Send + Sync {
    /// Whether the shard exists and has not been reclaimed
    fn shard_exists(&self, shard: ShardId) -> bool;

    /// Every live shard
    fn list_shards(&self) -> Vec<ShardId>;

    /// Children of a split shard
    ///
    /// Empty until the split completes.
    fn list_child_shards(&self, parent: ShardId) -> Result<Vec<ShardId>>;

    /// Drop a drained split parent and its log
    fn reclaim_shard(&self, shard: ShardId) -> Result<()>;
}

/// Leader epochs
pub trait LeaderEpochs: Send + Sync {
    /// Epoch of the shard's current leader
    ///
    /// Increases on every leadership change.
    fn shard_leader_epoch(&self, shard: ShardId) -> Result<u64>;
}

/// Callback invoked on the commit-apply path of a shard
///
/// Called with the position of the entry that made the commit visible,
/// while the shard's log is still held by the writer, so positions arrive
/// in log order per shard. Never called for aborts.
pub trait CommitObserver: Send + Sync {
    /// A commit became visible on `shard` at `position`
    fn on_commit_applied(&self, shard: ShardId, position: LogPosition);
}

/// Everything change capture consumes from a storage engine
pub trait StorageEngine: ShardLogReader + TransactionResolver + ShardTopology + LeaderEpochs {
    /// Register a commit observer
    ///
    /// Held weakly: dropping the observer unregisters it.
    fn register_commit_observer(&self, observer: Weak<dyn CommitObserver>);
}
