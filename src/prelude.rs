//! Convenient imports for Strata CDC.
//!
//! ```ignore
//! use strata_cdc::prelude::*;
//!
//! let cdc = CdcService::ephemeral(store.clone())?;
//! ```

// Main entry point
pub use crate::engine::{CdcConfig, CdcService, CdcServiceBuilder, PollResponse, PollableShard};

// Error handling
pub use crate::core::{Error, Result};

// Records and progress
pub use crate::core::{
    ChangeRecord, Checkpoint, LogPosition, LogicalTimestamp, RecordKind, RecordPayload, RowChange,
    RowOp, ShardId, StreamId, TxnId, Value,
};

// Stream options and durability
pub use crate::engine::{DurabilityMode, SplitPhase, StreamOptions};

// Reference store
pub use crate::storage::{ShardedLogStore, WriteTxn};

pub use std::sync::Arc;
