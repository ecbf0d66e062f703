//! Core types for Strata change capture
//!
//! This crate defines the vocabulary shared by every other crate:
//! - [`LogPosition`] and [`LogicalTimestamp`]: ordering primitives
//! - [`ShardId`], [`StreamId`], [`TxnId`], [`TableId`]: identifiers
//! - [`ChangeRecord`] and [`RecordKind`]: what a stream emits
//! - [`Checkpoint`]: per-(stream, shard) progress
//! - [`LogEntry`]: the storage engine's shard log format
//! - [`traits`]: the narrow interfaces consumed from the storage engine
//! - [`Error`]: the canonical error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod error;
pub mod log;
pub mod position;
pub mod record;
pub mod traits;
pub mod types;
pub mod value;

pub use checkpoint::{Checkpoint, TxnResume};
pub use error::{Error, Result};
pub use log::{LogEntry, LogPayload, SchemaChange};
pub use position::{LogPosition, LogicalTimestamp};
pub use record::{ChangeRecord, RecordKind, RecordPayload, RowChange, RowOp};
pub use traits::{
    CommitObserver, LeaderEpochs, ShardLogReader, ShardTopology, StorageEngine, TxnOutcome,
    TransactionResolver,
};
pub use types::{ShardId, StreamId, TableId, TxnId};
pub use value::Value;
