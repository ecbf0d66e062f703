//! Change-capture configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! max_stream_intent_records = 50
//! max_log_scan_entries = 4096
//! consistent_records = true
//! resolver_max_retries = 5
//! resolver_backoff_ms = 2
//! resolver_backoff_max_ms = 50
//! leader_retry_limit = 3
//! parent_deletion_retry_ms = 1000
//! compaction_threshold = 10000
//!
//! [durability]
//! mode = "batched"
//! interval_ms = 100
//! batch_size = 1000
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use strata_core::{Error, Result};
use strata_durability::DurabilityMode;

fn default_max_stream_intent_records() -> usize {
    50
}

fn default_max_log_scan_entries() -> usize {
    4096
}

fn default_true() -> bool {
    true
}

fn default_resolver_max_retries() -> u32 {
    5
}

fn default_resolver_backoff_ms() -> u64 {
    2
}

fn default_resolver_backoff_max_ms() -> u64 {
    50
}

fn default_leader_retry_limit() -> u32 {
    3
}

fn default_parent_deletion_retry_ms() -> u64 {
    1000
}

fn default_compaction_threshold() -> u64 {
    10_000
}

/// Change-capture service configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdcConfig {
    /// Max row records emitted per poll; more truncates the batch
    #[serde(default = "default_max_stream_intent_records")]
    pub max_stream_intent_records: usize,

    /// Max log entries read per poll
    #[serde(default = "default_max_log_scan_entries")]
    pub max_log_scan_entries: usize,

    /// Default for new streams: gate emission behind the safe-time barrier
    #[serde(default = "default_true")]
    pub consistent_records: bool,

    /// Status lookups retried this many times before `TransactionUnresolved`
    #[serde(default = "default_resolver_max_retries")]
    pub resolver_max_retries: u32,

    /// Initial retry backoff
    #[serde(default = "default_resolver_backoff_ms")]
    pub resolver_backoff_ms: u64,

    /// Backoff cap
    #[serde(default = "default_resolver_backoff_max_ms")]
    pub resolver_backoff_max_ms: u64,

    /// Polls restarted this many times on leader change before `LeaderNotReady`
    #[serde(default = "default_leader_retry_limit")]
    pub leader_retry_limit: u32,

    /// Interval of the split-parent retention task
    #[serde(default = "default_parent_deletion_retry_ms")]
    pub parent_deletion_retry_ms: u64,

    /// Metadata log fsync policy
    #[serde(default)]
    pub durability: DurabilityMode,

    /// Metadata log entries that trigger compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: u64,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            max_stream_intent_records: default_max_stream_intent_records(),
            max_log_scan_entries: default_max_log_scan_entries(),
            consistent_records: true,
            resolver_max_retries: default_resolver_max_retries(),
            resolver_backoff_ms: default_resolver_backoff_ms(),
            resolver_backoff_max_ms: default_resolver_backoff_max_ms(),
            leader_retry_limit: default_leader_retry_limit(),
            parent_deletion_retry_ms: default_parent_deletion_retry_ms(),
            durability: DurabilityMode::default(),
            compaction_threshold: default_compaction_threshold(),
        }
    }
}

impl CdcConfig {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: CdcConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_stream_intent_records == 0 {
            return Err(Error::Config("max_stream_intent_records must be > 0".into()));
        }
        if self.max_log_scan_entries == 0 {
            return Err(Error::Config("max_log_scan_entries must be > 0".into()));
        }
        if self.resolver_backoff_ms > self.resolver_backoff_max_ms {
            return Err(Error::Config(
                "resolver_backoff_ms must not exceed resolver_backoff_max_ms".into(),
            ));
        }
        if self.parent_deletion_retry_ms == 0 {
            return Err(Error::Config("parent_deletion_retry_ms must be > 0".into()));
        }
        if let DurabilityMode::Batched { batch_size: 0, .. } = self.durability {
            return Err(Error::Config("durability.batch_size must be > 0".into()));
        }
        Ok(())
    }

    /// Retention task interval
    pub fn parent_deletion_interval(&self) -> Duration {
        Duration::from_millis(self.parent_deletion_retry_ms)
    }
}
