//! Stream checkpoints
//!
//! A [`Checkpoint`] marks a stream's progress over one shard:
//! - `position`: every log entry at or below it has been fully consumed
//!   (emitted, discarded, or irrelevant) and need not be re-read
//! - `safe_time`: every commit unit at or below it that was ever read has
//!   been emitted, so a resuming poll skips them instead of re-deriving them
//! - `resume`: a transaction whose records were paginated part-way
//!
//! Both `position` and `safe_time` only move forward. A checkpoint is the
//! sole resumption source after a restart.

use crate::position::{LogPosition, LogicalTimestamp};
use crate::types::TxnId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Progress within a transaction that did not fit in one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResume {
    /// Transaction being emitted
    pub txn: TxnId,
    /// Its commit time
    pub commit_time: LogicalTimestamp,
    /// Number of its row records already emitted
    pub emitted: u32,
}

/// Per-(stream, shard) progress marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last fully consumed log position
    pub position: LogPosition,
    /// Commit-time watermark of emitted units
    pub safe_time: LogicalTimestamp,
    /// Partially emitted transaction, if any
    pub resume: Option<TxnResume>,
}

impl Checkpoint {
    /// Checkpoint at `position` with no safe-time history
    pub fn from_position(position: LogPosition) -> Self {
        Self {
            position,
            safe_time: LogicalTimestamp::MIN,
            resume: None,
        }
    }

    /// Checkpoint at the start of a shard's log
    pub fn min() -> Self {
        Self::from_position(LogPosition::MIN)
    }

    fn progress(&self) -> (LogPosition, LogicalTimestamp, u32) {
        (
            self.position,
            self.safe_time,
            self.resume.map(|r| r.emitted).unwrap_or(0),
        )
    }

    /// Compare stream progress
    ///
    /// `position` and `safe_time` move together monotonically, so the
    /// lexicographic order over (position, safe_time, resume progress) is
    /// the order in which a single poller produces checkpoints.
    pub fn progress_cmp(&self, other: &Checkpoint) -> Ordering {
        self.progress().cmp(&other.progress())
    }

    /// Whether this checkpoint is strictly behind `other`
    pub fn is_behind(&self, other: &Checkpoint) -> bool {
        self.progress_cmp(other) == Ordering::Less
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::min()
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.position, self.safe_time)?;
        if let Some(r) = &self.resume {
            write!(f, " (resume {} after {})", r.txn, r.emitted)?;
        }
        Ok(())
    }
}
