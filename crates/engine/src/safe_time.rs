//! Safe-time barrier
//!
//! The safe time of a shard is the timestamp at or below which every
//! transaction that could still commit on the shard is resolved. A poll
//! only emits commit units whose commit time is at or below it.
//!
//! ```text
//! safe = max(previous, min(horizon, constraint_1, constraint_2, ...))
//!
//! horizon      timestamp of the last log entry scanned
//! constraint   pending txn:                 first write time - 1
//!              committed, apply not seen:   commit time - 1
//! ```
//!
//! Any transaction that has not yet written to the shard commits above the
//! horizon, because its first write here will land above it. The barrier
//! never moves backward; with nothing scanned it stays where it was.

use strata_core::LogicalTimestamp;

/// Per-poll safe-time computation for one shard
#[derive(Debug, Clone, Copy)]
pub struct SafeTimeBarrier {
    previous: LogicalTimestamp,
    horizon: Option<LogicalTimestamp>,
    bound: LogicalTimestamp,
    constrained: usize,
}

impl SafeTimeBarrier {
    /// Start from the safe time stored in the checkpoint
    pub fn new(previous: LogicalTimestamp) -> Self {
        Self {
            previous,
            horizon: None,
            bound: LogicalTimestamp::MAX,
            constrained: 0,
        }
    }

    /// Timestamp of the last scanned entry
    pub fn observe_horizon(&mut self, ts: LogicalTimestamp) {
        self.horizon = Some(self.horizon.map_or(ts, |h| h.max(ts)));
    }

    /// A transaction with a write at `first_write` is still pending
    pub fn constrain_pending(&mut self, first_write: LogicalTimestamp) {
        self.constrain(first_write.prev());
    }

    /// A transaction committed at `commit_time` is not yet applied in the scan
    pub fn constrain_committed(&mut self, commit_time: LogicalTimestamp) {
        self.constrain(commit_time.prev());
    }

    fn constrain(&mut self, bound: LogicalTimestamp) {
        self.bound = self.bound.min(bound);
        self.constrained += 1;
    }

    /// Number of unresolved transactions holding the barrier
    pub fn constrained(&self) -> usize {
        self.constrained
    }

    /// Resulting safe time
    pub fn safe_time(&self) -> LogicalTimestamp {
        match self.horizon {
            Some(horizon) => self.previous.max(horizon.min(self.bound)),
            None => self.previous,
        }
    }
}

/// Safe time across several shards: the least per-shard safe time
///
/// Records from different shards with commit times at or below it can be
/// merged by commit time. An empty set yields `LogicalTimestamp::MIN`.
pub fn combined_safe_time<I>(per_shard: I) -> LogicalTimestamp
where
    I: IntoIterator<Item = LogicalTimestamp>,
{
    per_shard.into_iter().min().unwrap_or(LogicalTimestamp::MIN)
}
