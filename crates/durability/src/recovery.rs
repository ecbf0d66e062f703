//! Metadata recovery
//!
//! Replays the metadata log into a [`MetaState`]:
//! - Valid frames are applied in order
//! - Corrupt frames are skipped, up to a configurable limit
//! - An incomplete frame at the end (torn tail) stops replay cleanly
//!
//! ## Key Principle
//!
//! After recovery every checkpoint, stream, historical mark and split phase
//! reads back the value of the last durable write. A torn tail can only
//! lose writes that were never acknowledged as durable.
//!
//! ## Usage
//!
//! ```ignore
//! let (state, result) = MetaRecovery::recover(&path, RecoveryOptions::default())?;
//! println!("{}", result.summary());
//! ```

use crate::encoding::{decode_frame, Frame};
use crate::entry::{MetaEntry, SplitRecord, StreamOptions};
use crate::error::MetaLogError;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::time::Instant;
use strata_core::{Checkpoint, LogPosition, ShardId, StreamId};
use tracing::{debug, info, warn};

// ============================================================================
// Recovered State
// ============================================================================

/// Persisted description of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMeta {
    /// Shards named at creation
    pub shards: Vec<ShardId>,
    /// Options
    pub options: StreamOptions,
}

/// Everything the metadata log describes
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MetaState {
    /// Live streams
    pub streams: FxHashMap<StreamId, StreamMeta>,
    /// Checkpoints with the leader epoch of their writer
    pub checkpoints: FxHashMap<(StreamId, ShardId), (Checkpoint, u64)>,
    /// Historical high-water marks
    pub historical: FxHashMap<ShardId, LogPosition>,
    /// Split-handoff state by parent
    pub splits: FxHashMap<ShardId, SplitRecord>,
}

impl MetaState {
    /// Apply one entry
    pub fn apply(&mut self, entry: MetaEntry) {
        match entry {
            MetaEntry::StreamCreated {
                stream,
                shards,
                options,
            } => {
                self.streams.insert(stream, StreamMeta { shards, options });
            }
            MetaEntry::StreamDeleted { stream } => {
                self.streams.remove(&stream);
                self.checkpoints.retain(|(s, _), _| *s != stream);
            }
            MetaEntry::CheckpointSet {
                stream,
                shard,
                checkpoint,
                epoch,
            } => {
                if self.streams.contains_key(&stream) {
                    self.checkpoints.insert((stream, shard), (checkpoint, epoch));
                }
            }
            MetaEntry::CheckpointDeleted { stream, shard } => {
                self.checkpoints.remove(&(stream, shard));
            }
            MetaEntry::HistoricalMax { shard, position } => {
                let mark = self.historical.entry(shard).or_insert(LogPosition::INVALID);
                if position > *mark {
                    *mark = position;
                }
            }
            MetaEntry::SplitPhase(record) => match self.splits.get(&record.parent) {
                Some(existing) if existing.phase > record.phase => {}
                _ => {
                    self.splits.insert(record.parent, record);
                }
            },
        }
    }

    /// Minimal entry sequence that rebuilds this state
    ///
    /// Streams precede their checkpoints. Output order is deterministic.
    pub fn to_entries(&self) -> Vec<MetaEntry> {
        let mut entries = Vec::new();

        let mut streams: Vec<_> = self.streams.iter().collect();
        streams.sort_by_key(|(id, _)| **id);
        for (stream, meta) in streams {
            entries.push(MetaEntry::StreamCreated {
                stream: *stream,
                shards: meta.shards.clone(),
                options: meta.options,
            });
        }

        let mut checkpoints: Vec<_> = self.checkpoints.iter().collect();
        checkpoints.sort_by_key(|(key, _)| **key);
        for ((stream, shard), (checkpoint, epoch)) in checkpoints {
            entries.push(MetaEntry::CheckpointSet {
                stream: *stream,
                shard: *shard,
                checkpoint: *checkpoint,
                epoch: *epoch,
            });
        }

        let mut marks: Vec<_> = self.historical.iter().collect();
        marks.sort_by_key(|(shard, _)| **shard);
        for (shard, position) in marks {
            entries.push(MetaEntry::HistoricalMax {
                shard: *shard,
                position: *position,
            });
        }

        let mut splits: Vec<_> = self.splits.values().collect();
        splits.sort_by_key(|r| r.parent);
        for record in splits {
            entries.push(MetaEntry::SplitPhase(record.clone()));
        }

        entries
    }
}

// ============================================================================
// Recovery Options
// ============================================================================

/// Recovery options
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    /// Maximum corrupt entries to tolerate before failing
    pub max_corrupt_entries: usize,
    /// Whether to log each skipped entry
    pub verbose: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        RecoveryOptions {
            max_corrupt_entries: 10,
            verbose: false,
        }
    }
}

impl RecoveryOptions {
    /// Strict recovery options - fail on any corruption
    pub fn strict() -> Self {
        RecoveryOptions {
            max_corrupt_entries: 0,
            verbose: true,
        }
    }

    /// Permissive recovery options - tolerate more corruption
    pub fn permissive() -> Self {
        RecoveryOptions {
            max_corrupt_entries: 100,
            verbose: false,
        }
    }
}

// ============================================================================
// Recovery Result
// ============================================================================

/// Recovery result
#[derive(Debug, Default, Clone)]
pub struct RecoveryResult {
    /// Entries applied
    pub entries_replayed: u64,
    /// Corrupt entries skipped
    pub corrupt_entries_skipped: u64,
    /// Bytes of incomplete trailing frame discarded
    pub torn_tail_bytes: u64,
    /// Length of the log prefix made of complete frames
    pub valid_len: u64,
    /// Streams recovered
    pub streams_recovered: usize,
    /// Checkpoints recovered
    pub checkpoints_recovered: usize,
    /// Historical marks recovered
    pub historical_marks_recovered: usize,
    /// Total recovery time (microseconds)
    pub recovery_time_micros: u64,
}

impl RecoveryResult {
    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Recovery complete: {} entries, {} streams, {} checkpoints, {} historical marks, {} corrupt, {} torn bytes, {:.2}ms",
            self.entries_replayed,
            self.streams_recovered,
            self.checkpoints_recovered,
            self.historical_marks_recovered,
            self.corrupt_entries_skipped,
            self.torn_tail_bytes,
            self.recovery_time_micros as f64 / 1000.0,
        )
    }

    /// Check if recovery had any issues (corruption or a torn tail)
    pub fn has_issues(&self) -> bool {
        self.corrupt_entries_skipped > 0 || self.torn_tail_bytes > 0
    }
}

// ============================================================================
// Recovery Engine
// ============================================================================

/// Metadata recovery engine
pub struct MetaRecovery;

impl MetaRecovery {
    /// Replay the metadata log at `path`
    ///
    /// A missing file recovers to an empty state.
    pub fn recover(
        path: &Path,
        options: RecoveryOptions,
    ) -> Result<(MetaState, RecoveryResult), MetaLogError> {
        let start = Instant::now();
        let mut state = MetaState::default();
        let mut result = RecoveryResult::default();

        if !path.exists() {
            debug!("No metadata log found at {}", path.display());
            return Ok((state, result));
        }

        let buf = std::fs::read(path)?;
        Self::replay(&buf, &mut state, &mut result, &options)?;

        result.streams_recovered = state.streams.len();
        result.checkpoints_recovered = state.checkpoints.len();
        result.historical_marks_recovered = state.historical.len();
        result.recovery_time_micros = start.elapsed().as_micros() as u64;

        info!("{}", result.summary());
        Ok((state, result))
    }

    fn replay(
        buf: &[u8],
        state: &mut MetaState,
        result: &mut RecoveryResult,
        options: &RecoveryOptions,
    ) -> Result<(), MetaLogError> {
        let mut offset = 0usize;
        while offset < buf.len() {
            match decode_frame(&buf[offset..], offset as u64) {
                Frame::Entry { entry, len } => {
                    state.apply(entry);
                    result.entries_replayed += 1;
                    offset += len;
                }
                Frame::Corrupt { len, error } => {
                    result.corrupt_entries_skipped += 1;
                    if options.verbose {
                        warn!(offset, error = %error, "Skipping corrupt metadata entry");
                    }
                    if result.corrupt_entries_skipped > options.max_corrupt_entries as u64 {
                        return Err(MetaLogError::TooManyCorruptEntries(
                            result.corrupt_entries_skipped,
                            options.max_corrupt_entries,
                        ));
                    }
                    offset += len;
                }
                Frame::TornTail => {
                    result.torn_tail_bytes = (buf.len() - offset) as u64;
                    warn!(
                        offset,
                        bytes = result.torn_tail_bytes,
                        "Discarding torn metadata tail"
                    );
                    break;
                }
            }
        }
        result.valid_len = offset as u64;
        Ok(())
    }
}
