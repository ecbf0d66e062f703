//! Hybrid logical clock
//!
//! Generates timestamps that track wall-clock time but never repeat and
//! never go backwards, even if the system clock does. When two calls land
//! in the same microsecond the logical counter breaks the tie.

use parking_lot::Mutex;
use strata_core::position::LOGICAL_BITS;
use strata_core::LogicalTimestamp;

const MAX_LOGICAL: u64 = (1 << LOGICAL_BITS) - 1;

/// Hybrid clock shared by every shard of a store
pub struct HybridClock {
    last: Mutex<LogicalTimestamp>,
}

impl HybridClock {
    /// Create a clock starting at the current wall time
    pub fn new() -> Self {
        Self {
            last: Mutex::new(LogicalTimestamp::MIN),
        }
    }

    fn wall_micros() -> u64 {
        chrono::Utc::now().timestamp_micros().max(0) as u64
    }

    /// Next timestamp, strictly greater than every previous one
    pub fn now(&self) -> LogicalTimestamp {
        let mut last = self.last.lock();
        let wall = Self::wall_micros();
        let next = if wall > last.physical_micros() {
            LogicalTimestamp::new(wall, 0)
        } else if last.logical() < MAX_LOGICAL {
            LogicalTimestamp::new(last.physical_micros(), last.logical() + 1)
        } else {
            LogicalTimestamp::new(last.physical_micros() + 1, 0)
        };
        *last = next;
        next
    }

    /// Advance past a timestamp observed elsewhere
    ///
    /// Used when replaying a log so that new timestamps sort after
    /// recovered ones.
    pub fn observe(&self, ts: LogicalTimestamp) {
        let mut last = self.last.lock();
        if ts > *last {
            *last = ts;
        }
    }

    /// Last timestamp handed out
    pub fn last(&self) -> LogicalTimestamp {
        *self.last.lock()
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HybridClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClock")
            .field("last", &self.last())
            .finish()
    }
}
