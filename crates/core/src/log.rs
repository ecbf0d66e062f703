//! Shard log entry format
//!
//! This is the storage engine's view of a shard's history as consumed by
//! change capture. Each entry has a position and a hybrid timestamp;
//! timestamps strictly increase along a shard's log.
//!
//! Entry types:
//! - `Ddl`: schema change (every shard log opens with its table schema)
//! - `Write`: provisional write of a distributed transaction
//! - `SingleShardWrite`: autocommit write, committed at the entry time
//! - `Apply`: commit of a transaction applied on this shard
//! - `Abort`: provisional writes of a transaction discarded on this shard
//! - `Split`: the shard was split into children
//! - `LeaderNoOp`: first entry appended by a new leader

use crate::position::{LogPosition, LogicalTimestamp};
use crate::record::RowChange;
use crate::types::{ShardId, TableId, TxnId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A schema change carried by a DDL entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Table the change applies to
    pub table: TableId,
    /// Schema version after the change
    pub schema_version: u32,
    /// Column names after the change
    pub columns: Vec<String>,
    /// Statement text, for consumers
    pub statement: String,
}

/// Payload of a shard log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogPayload {
    /// Schema change
    Ddl(SchemaChange),

    /// Provisional write
    ///
    /// Visible only to its own transaction until an `Apply` or `Abort`
    /// for `txn` resolves it.
    Write {
        /// Owning transaction
        txn: TxnId,
        /// Ordinal of this write among the transaction's writes on this shard
        seq: u32,
        /// The row change
        row: RowChange,
    },

    /// Autocommit write, committed at the entry's timestamp
    SingleShardWrite {
        /// The row change
        row: RowChange,
    },

    /// Transaction commit applied on this shard
    ///
    /// `commit_time` is the transaction's global commit time; it is greater
    /// than every write timestamp of the transaction and no greater than the
    /// timestamp of this entry.
    Apply {
        /// Committed transaction
        txn: TxnId,
        /// Global commit time
        commit_time: LogicalTimestamp,
        /// Position of the transaction's first provisional write on this shard
        first_write: LogPosition,
    },

    /// Transaction abort applied on this shard
    Abort {
        /// Aborted transaction
        txn: TxnId,
    },

    /// Shard split marker
    Split {
        /// Child shards, in key-range order
        children: SmallVec<[ShardId; 2]>,
    },

    /// No-op appended by a newly elected leader
    LeaderNoOp {
        /// Leader epoch that appended the entry
        epoch: u64,
    },
}

/// One entry of a shard's replicated log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log
    pub position: LogPosition,
    /// Hybrid time at which the entry was appended
    pub timestamp: LogicalTimestamp,
    /// Entry payload
    pub payload: LogPayload,
}

impl LogEntry {
    /// Transaction this entry belongs to (if any)
    pub fn txn_id(&self) -> Option<TxnId> {
        match &self.payload {
            LogPayload::Write { txn, .. }
            | LogPayload::Apply { txn, .. }
            | LogPayload::Abort { txn } => Some(*txn),
            _ => None,
        }
    }

    /// Whether this entry resolves a transaction on this shard
    pub fn is_txn_boundary(&self) -> bool {
        matches!(
            self.payload,
            LogPayload::Apply { .. } | LogPayload::Abort { .. }
        )
    }

    /// Whether this entry makes committed data visible
    ///
    /// Only commit-bearing entries advance a shard's historical
    /// high-water mark.
    pub fn is_commit(&self) -> bool {
        matches!(
            self.payload,
            LogPayload::Apply { .. } | LogPayload::SingleShardWrite { .. }
        )
    }
}
