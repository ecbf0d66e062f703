//! Ordering primitives
//!
//! - [`LogPosition`]: (term, index) position in a shard's replicated log
//! - [`LogicalTimestamp`]: hybrid commit time, comparable across shards
//!
//! Both are totally ordered and cheap to copy. Checkpoints, change records
//! and the historical high-water mark are all expressed in these terms.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in a shard's replicated write log
///
/// Ordered by term, then index. `INVALID` sorts below every real position
/// and is used as "nothing observed yet"; `MIN` is the first valid position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogPosition {
    /// Leader term that appended the entry
    pub term: i64,
    /// Index within the log (monotonic across terms)
    pub index: i64,
}

impl LogPosition {
    /// Sentinel: no position
    pub const INVALID: LogPosition = LogPosition {
        term: -1,
        index: -1,
    };

    /// First valid position
    pub const MIN: LogPosition = LogPosition { term: 0, index: 0 };

    /// Create a position
    pub const fn new(term: i64, index: i64) -> Self {
        Self { term, index }
    }

    /// Whether this is a real position (not the `INVALID` sentinel)
    pub fn is_valid(&self) -> bool {
        *self > Self::INVALID
    }

    /// The position immediately preceding this one in the same term
    ///
    /// Used to park a checkpoint right before an entry that must be
    /// re-read by the next poll.
    pub fn before(&self) -> Self {
        Self {
            term: self.term,
            index: self.index - 1,
        }
    }
}

impl Default for LogPosition {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

/// Number of low bits reserved for the logical counter
pub const LOGICAL_BITS: u32 = 12;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// Hybrid logical timestamp
///
/// Packed as `physical_micros << 12 | logical`. Comparable across shards;
/// the commit time of a transaction is the same on every shard it touches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct LogicalTimestamp(u64);

impl LogicalTimestamp {
    /// Lowest timestamp
    pub const MIN: LogicalTimestamp = LogicalTimestamp(0);

    /// Highest timestamp
    pub const MAX: LogicalTimestamp = LogicalTimestamp(u64::MAX);

    /// Build from physical microseconds and a logical counter
    pub fn new(physical_micros: u64, logical: u64) -> Self {
        LogicalTimestamp((physical_micros << LOGICAL_BITS) | (logical & LOGICAL_MASK))
    }

    /// Build from the packed representation
    pub const fn from_raw(raw: u64) -> Self {
        LogicalTimestamp(raw)
    }

    /// Packed representation
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Physical component in microseconds
    pub fn physical_micros(&self) -> u64 {
        self.0 >> LOGICAL_BITS
    }

    /// Logical component
    pub fn logical(&self) -> u64 {
        self.0 & LOGICAL_MASK
    }

    /// The immediately preceding timestamp (saturating)
    pub fn prev(&self) -> Self {
        LogicalTimestamp(self.0.saturating_sub(1))
    }

    /// The immediately following timestamp (saturating)
    pub fn next(&self) -> Self {
        LogicalTimestamp(self.0.saturating_add(1))
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ physical: {}, logical: {} }}",
            self.physical_micros(),
            self.logical()
        )
    }
}
