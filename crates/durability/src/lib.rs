//! Durability layer for change-capture metadata
//!
//! This crate persists everything a restarted node needs to resume streams:
//! - MetaEntry types: streams, checkpoints, historical marks, split phases
//! - Frame encoding/decoding with CRC32 checksums
//! - Durability modes: None, Strict, Batched
//! - Recovery: replay the metadata log into a [`MetaState`]
//! - Compaction: rewrite the log from current state

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod entry;
pub mod error;
pub mod mode;
pub mod recovery;
pub mod wal;

pub use encoding::{decode_frame, encode_frame, Frame};
pub use entry::{MetaEntry, SplitPhase, SplitRecord, StreamOptions};
pub use error::MetaLogError;
pub use mode::DurabilityMode;
pub use recovery::{MetaRecovery, MetaState, RecoveryOptions, RecoveryResult, StreamMeta};
pub use wal::{MetaLog, META_LOG_FILENAME};
