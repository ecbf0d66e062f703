//! Metadata log entry types
//!
//! This module defines every record the metadata log persists:
//! - StreamCreated / StreamDeleted: stream lifecycle
//! - CheckpointSet / CheckpointDeleted: per-(stream, shard) progress
//! - HistoricalMax: per-shard high-water mark of committed positions
//! - SplitPhase: split-handoff state of a parent shard
//!
//! Every entry is a full "set" of the state it names, so replaying an entry
//! twice is harmless and the latest entry for a key wins.

use serde::{Deserialize, Serialize};
use strata_core::{Checkpoint, LogPosition, LogicalTimestamp, ShardId, StreamId};

/// Per-stream options fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Gate emission behind the safe-time barrier
    pub consistent_records: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            consistent_records: true,
        }
    }
}

/// Split-handoff phase of a parent shard
///
/// ```text
/// Active ──► Splitting ──► ParentDraining ──► ParentDeleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SplitPhase {
    /// No split observed
    Active,
    /// Split marker seen, children not yet listed
    Splitting,
    /// Children listed; parent retained until every stream drains it
    ParentDraining,
    /// Parent reclaimed
    ParentDeleted,
}

/// Persisted split-handoff state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    /// Split parent
    pub parent: ShardId,
    /// Children, empty while `Splitting`
    pub children: Vec<ShardId>,
    /// Position of the split marker in the parent's log
    pub split_position: LogPosition,
    /// Timestamp of the split marker
    pub split_time: LogicalTimestamp,
    /// Current phase
    pub phase: SplitPhase,
}

/// Metadata log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaEntry {
    /// Stream created over a shard set
    StreamCreated {
        /// Stream
        stream: StreamId,
        /// Shards the stream covers
        shards: Vec<ShardId>,
        /// Options
        options: StreamOptions,
    },

    /// Stream deleted, with all its checkpoints
    StreamDeleted {
        /// Stream
        stream: StreamId,
    },

    /// Checkpoint stored
    CheckpointSet {
        /// Stream
        stream: StreamId,
        /// Shard
        shard: ShardId,
        /// New checkpoint
        checkpoint: Checkpoint,
        /// Leader epoch of the writer
        epoch: u64,
    },

    /// Checkpoint dropped (shard left the stream)
    CheckpointDeleted {
        /// Stream
        stream: StreamId,
        /// Shard
        shard: ShardId,
    },

    /// Historical high-water mark advanced
    HistoricalMax {
        /// Shard
        shard: ShardId,
        /// Highest committed position observed
        position: LogPosition,
    },

    /// Split-handoff state changed
    SplitPhase(SplitRecord),
}

impl MetaEntry {
    /// Stream the entry belongs to, if any
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            MetaEntry::StreamCreated { stream, .. }
            | MetaEntry::StreamDeleted { stream }
            | MetaEntry::CheckpointSet { stream, .. }
            | MetaEntry::CheckpointDeleted { stream, .. } => Some(*stream),
            MetaEntry::HistoricalMax { .. } | MetaEntry::SplitPhase(_) => None,
        }
    }

    /// Shard the entry belongs to, if any
    pub fn shard(&self) -> Option<ShardId> {
        match self {
            MetaEntry::CheckpointSet { shard, .. }
            | MetaEntry::CheckpointDeleted { shard, .. }
            | MetaEntry::HistoricalMax { shard, .. } => Some(*shard),
            MetaEntry::SplitPhase(record) => Some(record.parent),
            MetaEntry::StreamCreated { .. } | MetaEntry::StreamDeleted { .. } => None,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MetaEntry::StreamCreated { .. } => "stream_created",
            MetaEntry::StreamDeleted { .. } => "stream_deleted",
            MetaEntry::CheckpointSet { .. } => "checkpoint_set",
            MetaEntry::CheckpointDeleted { .. } => "checkpoint_deleted",
            MetaEntry::HistoricalMax { .. } => "historical_max",
            MetaEntry::SplitPhase(_) => "split_phase",
        }
    }
}
