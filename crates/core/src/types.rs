//! Identifier types
//!
//! - [`ShardId`]: a horizontally partitioned unit with its own log
//! - [`StreamId`]: a named change-capture subscription
//! - [`TxnId`]: a distributed transaction
//! - [`TableId`]: a table hosted by one or more shards
//!
//! Streams hold shard ids, never shard handles: shards are created and
//! destroyed by the store independently of any stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a shard
///
/// Split children receive fresh ids; lineage is recorded separately by the
/// store (child -> parent) and by the split handoff (parent -> children).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(Uuid);

impl ShardId {
    /// Create a new random ShardId using UUID v4
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::types::ShardId;
    ///
    /// let a = ShardId::new();
    /// let b = ShardId::new();
    /// assert_ne!(a, b);
    /// ```
    pub fn new() -> Self {
        ShardId(Uuid::new_v4())
    }

    /// Create ShardId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        ShardId(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ShardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Unique identifier for a change stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    /// Create a new random StreamId
    pub fn new() -> Self {
        StreamId(Uuid::new_v4())
    }

    /// Create StreamId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        StreamId(Uuid::from_bytes(bytes))
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Transaction identifier
///
/// Allocated by the transaction manager; unique for the lifetime of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Table name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(String);

impl TableId {
    /// Create a table id
    pub fn new(name: impl Into<String>) -> Self {
        TableId(name.into())
    }

    /// Table name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TableId {
    fn from(s: &str) -> Self {
        TableId(s.to_string())
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
