//! Durability mode for metadata log writes.
//!
//! Defines when checkpoint, stream and split metadata reach stable storage.

use serde::{Deserialize, Serialize};

/// Durability mode for metadata log writes.
///
/// Controls when the metadata log is fsynced and the trade-off between
/// poll latency and how much checkpoint progress a crash can lose.
///
/// # Mode Comparison
///
/// | Mode | Crash loses | Use Case |
/// |------|-------------|----------|
/// | None | everything | Tests, ephemeral streams |
/// | Batched | up to one batch of checkpoint advances | Production (balanced) |
/// | Strict | nothing | Consumers that cannot tolerate re-delivery |
///
/// Losing checkpoint advances never loses records: a consumer resumes from
/// the older checkpoint and sees the lost range again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DurabilityMode {
    /// No durability - metadata lives in memory only.
    ///
    /// No file I/O at all.
    None,

    /// fsync after every metadata write.
    Strict,

    /// fsync every N writes OR every T milliseconds.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum writes between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Check if this mode writes a metadata log.
    ///
    /// Returns false for None mode, true for all others.
    pub fn requires_wal(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }

    /// Check if this mode requires fsync on every write.
    ///
    /// Returns true only for Strict mode.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Strict)
    }

    /// Human-readable description of the mode.
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::None => "No durability (metadata lost on restart)",
            DurabilityMode::Strict => "Sync fsync (safest, slowest)",
            DurabilityMode::Batched { .. } => "Batched fsync (balanced speed/safety)",
        }
    }

    /// Create a buffered mode with recommended defaults.
    ///
    /// Returns `Batched { interval_ms: 100, batch_size: 1000 }`.
    pub fn buffered_default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        Self::buffered_default()
    }
}
