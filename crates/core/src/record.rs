//! Change records emitted by a stream
//!
//! Every DML record belongs to exactly one transaction bracketed by one
//! BEGIN and one COMMIT record in the stream. DDL records stand alone.
//! Autocommit writes get an implicit BEGIN/COMMIT pair of their own.

use crate::log::SchemaChange;
use crate::position::{LogPosition, LogicalTimestamp};
use crate::types::{ShardId, TableId, TxnId};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Kind of an emitted record
///
/// The discriminant order is stable; consumers tally records into an
/// eight-slot array indexed by [`RecordKind::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Schema change
    Ddl,
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
    /// Row read (never produced from the write log)
    Read,
    /// Table truncated
    Truncate,
    /// Transaction start marker
    Begin,
    /// Transaction end marker
    Commit,
}

impl RecordKind {
    /// All kinds in index order
    pub const ALL: [RecordKind; 8] = [
        RecordKind::Ddl,
        RecordKind::Insert,
        RecordKind::Update,
        RecordKind::Delete,
        RecordKind::Read,
        RecordKind::Truncate,
        RecordKind::Begin,
        RecordKind::Commit,
    ];

    /// Stable index of this kind (0..=7)
    pub fn index(&self) -> usize {
        match self {
            RecordKind::Ddl => 0,
            RecordKind::Insert => 1,
            RecordKind::Update => 2,
            RecordKind::Delete => 3,
            RecordKind::Read => 4,
            RecordKind::Truncate => 5,
            RecordKind::Begin => 6,
            RecordKind::Commit => 7,
        }
    }

    /// Whether this kind carries a row change
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            RecordKind::Insert
                | RecordKind::Update
                | RecordKind::Delete
                | RecordKind::Read
                | RecordKind::Truncate
        )
    }

    /// Upper-case name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Ddl => "DDL",
            RecordKind::Insert => "INSERT",
            RecordKind::Update => "UPDATE",
            RecordKind::Delete => "DELETE",
            RecordKind::Read => "READ",
            RecordKind::Truncate => "TRUNCATE",
            RecordKind::Begin => "BEGIN",
            RecordKind::Commit => "COMMIT",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowOp {
    /// Insert
    Insert,
    /// Update
    Update,
    /// Delete
    Delete,
    /// Truncate the whole table
    Truncate,
}

impl RowOp {
    /// Record kind produced by this operation
    pub fn record_kind(&self) -> RecordKind {
        match self {
            RowOp::Insert => RecordKind::Insert,
            RowOp::Update => RecordKind::Update,
            RowOp::Delete => RecordKind::Delete,
            RowOp::Truncate => RecordKind::Truncate,
        }
    }
}

/// A change to a single row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    /// Table the row belongs to
    pub table: TableId,
    /// Operation
    pub op: RowOp,
    /// Primary key
    pub key: Value,
    /// Row image before the change
    pub before: Option<Vec<Value>>,
    /// Row image after the change
    pub after: Option<Vec<Value>>,
}

impl RowChange {
    /// Create a row change with no images
    pub fn new(table: TableId, op: RowOp, key: Value) -> Self {
        Self {
            table,
            op,
            key,
            before: None,
            after: None,
        }
    }

    /// Insert of `after` under `key`
    pub fn insert(table: TableId, key: Value, after: Vec<Value>) -> Self {
        Self {
            after: Some(after),
            ..Self::new(table, RowOp::Insert, key)
        }
    }

    /// Update of `key` from `before` to `after`
    pub fn update(table: TableId, key: Value, before: Vec<Value>, after: Vec<Value>) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
            ..Self::new(table, RowOp::Update, key)
        }
    }

    /// Delete of `key`
    pub fn delete(table: TableId, key: Value, before: Vec<Value>) -> Self {
        Self {
            before: Some(before),
            ..Self::new(table, RowOp::Delete, key)
        }
    }

    fn image_json(image: &Option<Vec<Value>>) -> serde_json::Value {
        match image {
            Some(cells) => serde_json::Value::Array(cells.iter().map(Value::to_json).collect()),
            None => serde_json::Value::Null,
        }
    }
}

/// Record payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordPayload {
    /// Schema change
    Ddl(SchemaChange),
    /// Row change
    Row(RowChange),
    /// BEGIN / COMMIT marker
    Marker,
}

/// One emitted unit of a change stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Record kind
    pub kind: RecordKind,
    /// Shard the record was read from
    pub shard: ShardId,
    /// Log position of the entry that produced the record
    pub position: LogPosition,
    /// Commit time of the owning transaction (entry time for DDL)
    pub commit_time: LogicalTimestamp,
    /// Owning transaction; `None` for DDL and autocommit writes
    pub txn: Option<TxnId>,
    /// Payload
    pub payload: RecordPayload,
}

impl ChangeRecord {
    /// BEGIN marker
    pub fn begin(
        shard: ShardId,
        position: LogPosition,
        commit_time: LogicalTimestamp,
        txn: Option<TxnId>,
    ) -> Self {
        Self {
            kind: RecordKind::Begin,
            shard,
            position,
            commit_time,
            txn,
            payload: RecordPayload::Marker,
        }
    }

    /// COMMIT marker
    pub fn commit(
        shard: ShardId,
        position: LogPosition,
        commit_time: LogicalTimestamp,
        txn: Option<TxnId>,
    ) -> Self {
        Self {
            kind: RecordKind::Commit,
            ..Self::begin(shard, position, commit_time, txn)
        }
    }

    /// DML record
    pub fn row(
        shard: ShardId,
        position: LogPosition,
        commit_time: LogicalTimestamp,
        txn: Option<TxnId>,
        row: RowChange,
    ) -> Self {
        Self {
            kind: row.op.record_kind(),
            shard,
            position,
            commit_time,
            txn,
            payload: RecordPayload::Row(row),
        }
    }

    /// DDL record
    pub fn ddl(
        shard: ShardId,
        position: LogPosition,
        commit_time: LogicalTimestamp,
        change: SchemaChange,
    ) -> Self {
        Self {
            kind: RecordKind::Ddl,
            shard,
            position,
            commit_time,
            txn: None,
            payload: RecordPayload::Ddl(change),
        }
    }

    /// Row change carried by this record (DML only)
    pub fn row_change(&self) -> Option<&RowChange> {
        match &self.payload {
            RecordPayload::Row(row) => Some(row),
            _ => None,
        }
    }

    /// Render as a consumer-facing JSON document
    pub fn to_json(&self) -> serde_json::Value {
        let mut doc = serde_json::json!({
            "op": self.kind.as_str(),
            "shard": self.shard.to_string(),
            "position": self.position.to_string(),
            "commit_time": self.commit_time.raw(),
            "txn": self.txn.map(|t| t.0),
        });
        match &self.payload {
            RecordPayload::Row(row) => {
                doc["table"] = serde_json::Value::String(row.table.to_string());
                doc["key"] = row.key.to_json();
                doc["before"] = RowChange::image_json(&row.before);
                doc["after"] = RowChange::image_json(&row.after);
            }
            RecordPayload::Ddl(change) => {
                doc["table"] = serde_json::Value::String(change.table.to_string());
                doc["schema_version"] = serde_json::Value::from(change.schema_version);
                doc["columns"] = serde_json::Value::from(change.columns.clone());
                doc["statement"] = serde_json::Value::String(change.statement.clone());
            }
            RecordPayload::Marker => {}
        }
        doc
    }
}
