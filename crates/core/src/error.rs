//! Error types for change capture
//!
//! One canonical error enum for every crate in the workspace.
//!
//! ## Categories
//!
//! - **Structural**: `ShardNotFound`, `StreamNotFound`, `CheckpointRegression`,
//!   `ShardSplit`, `StaleLeader`, `InvalidArgument`. Surfaced immediately.
//! - **Transient**: `TransactionUnresolved`, `SplitInProgress`, `LeaderNotReady`.
//!   Retried internally with bounded backoff, then surfaced; the caller
//!   retries the same poll.
//! - **Infrastructure**: `Storage`, `Durability`, `Corruption`, `Config`, `Io`,
//!   `Internal`. Surfaced.
//!
//! A truncated poll is not an error: see `PollResponse::truncated`.

use crate::checkpoint::Checkpoint;
use crate::types::{ShardId, StreamId, TxnId};
use thiserror::Error;

/// Result type alias for change-capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Change-capture errors
#[derive(Debug, Error)]
pub enum Error {
    /// Shard unknown to the store, or already reclaimed
    #[error("shard not found: {0}")]
    ShardNotFound(ShardId),

    /// Stream unknown or deleted
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Attempt to move a checkpoint backwards
    #[error("checkpoint regression: stored {current}, requested {requested}")]
    CheckpointRegression {
        /// Checkpoint currently stored
        current: Checkpoint,
        /// Checkpoint that was rejected
        requested: Checkpoint,
    },

    /// Transaction status could not be determined (transient)
    #[error("transaction unresolved: {0}")]
    TransactionUnresolved(TxnId),

    /// Shard is splitting and children are not listed yet (transient)
    #[error("split in progress on shard {0}")]
    SplitInProgress(ShardId),

    /// Parent fully drained for this stream; poll the children instead
    #[error("shard {parent} was split into {children:?}")]
    ShardSplit {
        /// Drained parent
        parent: ShardId,
        /// Children to poll
        children: Vec<ShardId>,
    },

    /// Leadership changed while the poll was in flight (transient)
    #[error("leader not ready for shard {0}")]
    LeaderNotReady(ShardId),

    /// Checkpoint write from a deposed leader
    #[error("stale leader epoch for shard {shard}: stored {stored}, attempted {attempted}")]
    StaleLeader {
        /// Shard
        shard: ShardId,
        /// Epoch recorded with the stored checkpoint
        stored: u64,
        /// Epoch of the rejected write
        attempted: u64,
    },

    /// Invalid caller input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage engine failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Metadata persistence failure
    #[error("durability error: {0}")]
    Durability(String),

    /// Persisted state failed validation
    #[error("corruption: {0}")]
    Corruption(String),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is transient
    ///
    /// Transient errors succeed on retry of the same request with the same
    /// checkpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransactionUnresolved(_) | Error::SplitInProgress(_) | Error::LeaderNotReady(_)
        )
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ShardNotFound(_) | Error::StreamNotFound(_))
    }

    /// Check if this error tells the caller to move to child shards
    pub fn is_split(&self) -> bool {
        matches!(self, Error::ShardSplit { .. })
    }
}
