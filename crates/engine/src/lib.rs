//! Change-capture engine
//!
//! Turns per-shard write logs into transactionally consistent change streams.
//!
//! - [`config`]: service configuration (TOML)
//! - [`resolver`]: retrying transaction status lookups
//! - [`safe_time`]: the per-shard emission watermark
//! - [`assembler`]: intent buffer and transaction assembly
//! - [`checkpoint_store`]: durable streams and checkpoints
//! - [`split`]: shard-split handoff
//! - [`high_water`]: historical high-water mark per shard
//! - [`service`]: [`CdcService`], the entry point

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod checkpoint_store;
pub mod config;
pub mod high_water;
pub mod resolver;
pub mod safe_time;
pub mod service;
pub mod split;

pub use assembler::{AssembledBatch, SplitMarker, TransactionAssembler};
pub use checkpoint_store::{StoredCheckpoint, StreamInfo, StreamStore};
pub use config::CdcConfig;
pub use high_water::HistoricalMaxTracker;
pub use resolver::{ResolverAdapter, ResolverSession, RetryPolicy};
pub use safe_time::{combined_safe_time, SafeTimeBarrier};
pub use service::{CdcService, CdcServiceBuilder, PollResponse, PollableShard};
pub use split::SplitHandoff;

pub use strata_durability::{DurabilityMode, SplitPhase, SplitRecord, StreamOptions};
