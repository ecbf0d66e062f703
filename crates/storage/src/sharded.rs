//! Sharded replicated-log store
//!
//! Each shard owns an append-only log guarded by its own mutex; the shard
//! map is a DashMap so writers to different shards never contend.
//!
//! # Design
//!
//! - DashMap<ShardId, Arc<Mutex<ShardLog>>>: sharded, lock per shard
//! - Timestamps are drawn from the shared hybrid clock while the shard's
//!   lock is held, so they strictly increase along every log
//! - Tables map to the leaf shards that host them; routing hashes the key
//! - A split appends a `Split` marker to the parent and creates children
//!   whose logs continue the parent's index sequence and open with the
//!   schemas of the tables they host
//! - After a split the parent only accepts `Apply`/`Abort` entries for
//!   transactions that wrote to it before the split
//!
//! # Commit apply
//!
//! ```text
//! commit(txn):
//!   1. TransactionManager::commit  -> commit_time (decision point)
//!   2. for each participant shard:
//!        lock shard, append Apply { txn, commit_time, first_write },
//!        notify commit observers, unlock
//! ```

use crate::routing::{key_hash, KeyRange};
use crate::transaction::WriteTxn;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};
use std::sync::{Arc, Weak};
use strata_concurrency::{HybridClock, TransactionManager, TxnState};
use strata_core::traits::{
    CommitObserver, LeaderEpochs, ShardLogReader, ShardTopology, StorageEngine,
    TransactionResolver, TxnOutcome,
};
use strata_core::{
    Error, LogEntry, LogPayload, LogPosition, LogicalTimestamp, Result, RowChange, SchemaChange,
    ShardId, TableId, TxnId, Value,
};
use tracing::{debug, info};

/// Snapshot of a shard's metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ShardInfo {
    /// Shard id
    pub id: ShardId,
    /// Split parent, if this shard is a split child
    pub parent: Option<ShardId>,
    /// Split children, empty unless split
    pub children: Vec<ShardId>,
    /// Owned key-hash range
    pub range: KeyRange,
    /// Current leader term
    pub term: i64,
    /// Current leader epoch
    pub epoch: u64,
    /// Position of the last entry (or the position before the first entry)
    pub last_position: LogPosition,
    /// Number of log entries
    pub entries: usize,
    /// Hosted tables
    pub tables: Vec<TableId>,
}

/// One shard: its log and metadata
#[derive(Debug)]
struct ShardLog {
    id: ShardId,
    parent: Option<ShardId>,
    children: SmallVec<[ShardId; 2]>,
    range: KeyRange,
    term: i64,
    next_index: i64,
    epoch: u64,
    entries: Vec<LogEntry>,
    schemas: FxHashMap<TableId, SchemaChange>,
}

impl ShardLog {
    fn new(
        id: ShardId,
        parent: Option<ShardId>,
        range: KeyRange,
        term: i64,
        first_index: i64,
    ) -> Self {
        Self {
            id,
            parent,
            children: SmallVec::new(),
            range,
            term,
            next_index: first_index,
            epoch: 1,
            entries: Vec::new(),
            schemas: FxHashMap::default(),
        }
    }

    fn next_position(&self) -> LogPosition {
        LogPosition::new(self.term, self.next_index)
    }

    fn append(&mut self, clock: &HybridClock, payload: LogPayload) -> LogPosition {
        let position = self.next_position();
        self.next_index += 1;
        self.entries.push(LogEntry {
            position,
            timestamp: clock.now(),
            payload,
        });
        position
    }

    fn read_after(&self, from: LogPosition, max_entries: usize) -> Vec<LogEntry> {
        let start = self.entries.partition_point(|e| e.position <= from);
        self.entries[start..]
            .iter()
            .take(max_entries)
            .cloned()
            .collect()
    }

    fn last_position(&self) -> LogPosition {
        self.entries
            .last()
            .map(|e| e.position)
            .unwrap_or_else(|| self.next_position().before())
    }

    fn is_split(&self) -> bool {
        !self.children.is_empty()
    }

    /// Transactions with writes here but no apply or abort yet
    fn unresolved_txns(&self) -> FxHashSet<TxnId> {
        let mut open = FxHashSet::default();
        for entry in &self.entries {
            match &entry.payload {
                LogPayload::Write { txn, .. } => {
                    open.insert(*txn);
                }
                LogPayload::Apply { txn, .. } | LogPayload::Abort { txn } => {
                    open.remove(txn);
                }
                _ => {}
            }
        }
        open
    }

    fn info(&self) -> ShardInfo {
        let mut tables: Vec<TableId> = self.schemas.keys().cloned().collect();
        tables.sort();
        ShardInfo {
            id: self.id,
            parent: self.parent,
            children: self.children.to_vec(),
            range: self.range,
            term: self.term,
            epoch: self.epoch,
            last_position: self.last_position(),
            entries: self.entries.len(),
            tables,
        }
    }
}

/// Sharded log store
///
/// # Thread Safety
///
/// All operations are thread-safe. Writers to different shards proceed in
/// parallel; writers to the same shard serialize on that shard's mutex.
///
/// # Example
///
/// ```ignore
/// use strata_storage::ShardedLogStore;
/// use strata_core::Value;
///
/// let store = ShardedLogStore::new();
/// let shard = store.create_table("test_table", &["id", "value_1"])?;
/// store.insert("test_table", Value::Int(1), vec![Value::Int(1), Value::Int(1)])?;
/// ```
pub struct ShardedLogStore {
    shards: DashMap<ShardId, Arc<Mutex<ShardLog>>>,
    /// Leaf shards hosting each table
    tables: DashMap<TableId, SmallVec<[ShardId; 4]>>,
    txns: TransactionManager,
    clock: Arc<HybridClock>,
    observers: RwLock<Vec<Weak<dyn CommitObserver>>>,
}

impl ShardedLogStore {
    /// Create an empty store
    pub fn new() -> Self {
        let clock = Arc::new(HybridClock::new());
        Self {
            shards: DashMap::new(),
            tables: DashMap::new(),
            txns: TransactionManager::new(Arc::clone(&clock)),
            clock,
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Shared hybrid clock
    pub fn clock(&self) -> &Arc<HybridClock> {
        &self.clock
    }

    /// Transaction manager (status authority)
    pub fn txn_manager(&self) -> &TransactionManager {
        &self.txns
    }

    fn shard(&self, id: ShardId) -> Result<Arc<Mutex<ShardLog>>> {
        self.shards
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(Error::ShardNotFound(id))
    }

    fn notify_commit(&self, shard: ShardId, position: LogPosition) {
        let observers = self.observers.read();
        for observer in observers.iter().filter_map(Weak::upgrade) {
            observer.on_commit_applied(shard, position);
        }
    }

    // ========================================================================
    // Schema
    // ========================================================================

    fn create_statement(table: &str, columns: &[&str]) -> String {
        format!("CREATE TABLE {} ({})", table, columns.join(", "))
    }

    /// Create a table hosted by one new shard
    pub fn create_table(&self, table: &str, columns: &[&str]) -> Result<ShardId> {
        let table_id = TableId::new(table);
        if self.tables.contains_key(&table_id) {
            return Err(Error::InvalidArgument(format!("table {} exists", table)));
        }
        let id = ShardId::new();
        let mut shard = ShardLog::new(id, None, KeyRange::FULL, 1, 1);
        let schema = SchemaChange {
            table: table_id.clone(),
            schema_version: 1,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            statement: Self::create_statement(table, columns),
        };
        shard.append(&self.clock, LogPayload::Ddl(schema.clone()));
        shard.schemas.insert(table_id.clone(), schema);
        self.shards.insert(id, Arc::new(Mutex::new(shard)));
        self.tables.insert(table_id, smallvec![id]);
        debug!(table, shard = %id, "created table");
        Ok(id)
    }

    /// Create a table colocated on an existing leaf shard
    pub fn create_colocated_table(
        &self,
        shard: ShardId,
        table: &str,
        columns: &[&str],
    ) -> Result<()> {
        let table_id = TableId::new(table);
        if self.tables.contains_key(&table_id) {
            return Err(Error::InvalidArgument(format!("table {} exists", table)));
        }
        let handle = self.shard(shard)?;
        let mut log = handle.lock();
        if log.is_split() {
            return Err(Error::InvalidArgument(format!("shard {} is split", shard)));
        }
        let schema = SchemaChange {
            table: table_id.clone(),
            schema_version: 1,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            statement: Self::create_statement(table, columns),
        };
        log.append(&self.clock, LogPayload::Ddl(schema.clone()));
        log.schemas.insert(table_id.clone(), schema);
        self.tables.insert(table_id, smallvec![shard]);
        Ok(())
    }

    /// Change a table's columns on every shard hosting it
    pub fn alter_table(&self, table: &str, columns: &[&str], statement: &str) -> Result<()> {
        let table_id = TableId::new(table);
        for shard in self.table_shards(table) {
            let handle = self.shard(shard)?;
            let mut log = handle.lock();
            let version = log
                .schemas
                .get(&table_id)
                .map(|s| s.schema_version + 1)
                .unwrap_or(1);
            let schema = SchemaChange {
                table: table_id.clone(),
                schema_version: version,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                statement: statement.to_string(),
            };
            log.append(&self.clock, LogPayload::Ddl(schema.clone()));
            log.schemas.insert(table_id.clone(), schema);
        }
        Ok(())
    }

    /// Leaf shards currently hosting `table`
    pub fn table_shards(&self, table: &str) -> Vec<ShardId> {
        self.tables
            .get(&TableId::new(table))
            .map(|s| s.to_vec())
            .unwrap_or_default()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn route(&self, table: &TableId, key: &Value) -> Result<Arc<Mutex<ShardLog>>> {
        let hash = key_hash(key);
        let candidates = self
            .tables
            .get(table)
            .map(|s| s.to_vec())
            .ok_or_else(|| Error::InvalidArgument(format!("unknown table {}", table)))?;
        for id in candidates {
            let handle = self.shard(id)?;
            let owns = handle.lock().range.contains(hash);
            if owns {
                return Ok(handle);
            }
        }
        Err(Error::Internal(format!("no shard owns key of {}", table)))
    }

    /// Lock the leaf shard owning `row`, re-routing if a split raced us
    fn lock_leaf<R>(
        &self,
        row: &RowChange,
        f: impl FnOnce(&mut ShardLog) -> Result<R>,
    ) -> Result<R> {
        let mut f = Some(f);
        loop {
            let handle = self.route(&row.table, &row.key)?;
            let mut log = handle.lock();
            if log.is_split() {
                continue;
            }
            let f = f
                .take()
                .ok_or_else(|| Error::Internal("write closure reused".into()))?;
            return f(&mut log);
        }
    }

    /// Autocommit write
    pub fn write_single(&self, row: RowChange) -> Result<LogPosition> {
        self.lock_leaf(&row.clone(), |log| {
            let position = log.append(&self.clock, LogPayload::SingleShardWrite { row });
            self.notify_commit(log.id, position);
            Ok(position)
        })
    }

    /// Autocommit insert
    pub fn insert(&self, table: &str, key: Value, row: Vec<Value>) -> Result<LogPosition> {
        self.write_single(RowChange::insert(TableId::new(table), key, row))
    }

    /// Start a transaction
    pub fn begin(&self) -> WriteTxn<'_> {
        WriteTxn::new(self, self.txns.begin())
    }

    /// Provisional write of `txn`
    pub fn txn_write(&self, txn: TxnId, row: RowChange) -> Result<LogPosition> {
        self.lock_leaf(&row.clone(), |log| {
            let position = log.next_position();
            let seq = self.txns.record_write(txn, log.id, position)?;
            let appended = log.append(&self.clock, LogPayload::Write { txn, seq, row });
            debug_assert_eq!(appended, position);
            Ok(position)
        })
    }

    /// Decide and apply commit of `txn`
    pub fn commit(&self, txn: TxnId) -> Result<LogicalTimestamp> {
        let commit_time = self.txns.commit(txn)?;
        self.apply_commit(txn)?;
        Ok(commit_time)
    }

    /// Decide commit without applying it to any participant
    ///
    /// The transaction is committed globally but its shards have not yet
    /// received the apply; follow with [`apply_commit`](Self::apply_commit).
    pub fn decide_commit(&self, txn: TxnId) -> Result<LogicalTimestamp> {
        self.txns.commit(txn)
    }

    /// Apply a decided commit to every participant shard
    pub fn apply_commit(&self, txn: TxnId) -> Result<()> {
        let commit_time = match self.txns.state(txn) {
            Some(TxnState::Committed { commit_time }) => commit_time,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "{} is not committed: {:?}",
                    txn, other
                )))
            }
        };
        for (shard, first_write) in self.txns.participants(txn) {
            let handle = self.shard(shard)?;
            let mut log = handle.lock();
            let position = log.append(
                &self.clock,
                LogPayload::Apply {
                    txn,
                    commit_time,
                    first_write,
                },
            );
            self.notify_commit(shard, position);
        }
        Ok(())
    }

    /// Decide and apply abort of `txn`
    pub fn abort(&self, txn: TxnId) -> Result<()> {
        self.txns.abort(txn, "rollback")?;
        for (shard, _) in self.txns.participants(txn) {
            let handle = self.shard(shard)?;
            handle.lock().append(&self.clock, LogPayload::Abort { txn });
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Split a leaf shard at the midpoint of its key range
    ///
    /// Returns the (lower, upper) children.
    pub fn split_shard(&self, parent: ShardId) -> Result<(ShardId, ShardId)> {
        let handle = self.shard(parent)?;
        let mut log = handle.lock();
        if log.is_split() {
            return Err(Error::InvalidArgument(format!("shard {} already split", parent)));
        }

        let lower_id = ShardId::new();
        let upper_id = ShardId::new();
        let split_position = log.append(
            &self.clock,
            LogPayload::Split {
                children: smallvec![lower_id, upper_id],
            },
        );
        log.children = smallvec![lower_id, upper_id];

        let (lower_range, upper_range) = log.range.split();
        let mut schemas: Vec<SchemaChange> = log.schemas.values().cloned().collect();
        schemas.sort_by(|a, b| a.table.cmp(&b.table));

        for (id, range) in [(lower_id, lower_range), (upper_id, upper_range)] {
            let mut child =
                ShardLog::new(id, Some(parent), range, log.term, split_position.index + 1);
            for schema in &schemas {
                child.append(&self.clock, LogPayload::Ddl(schema.clone()));
                child.schemas.insert(schema.table.clone(), schema.clone());
            }
            self.shards.insert(id, Arc::new(Mutex::new(child)));
        }

        for schema in &schemas {
            if let Some(mut hosts) = self.tables.get_mut(&schema.table) {
                hosts.retain(|s| *s != parent);
                hosts.push(lower_id);
                hosts.push(upper_id);
            }
        }

        info!(
            parent = %parent,
            lower = %lower_id,
            upper = %upper_id,
            split_position = %split_position,
            "split shard"
        );
        Ok((lower_id, upper_id))
    }

    /// Move leadership of `shard` to a new leader
    ///
    /// Starts a new term, bumps the epoch, and appends a no-op. Returns
    /// the new epoch.
    pub fn change_leader(&self, shard: ShardId) -> Result<u64> {
        let handle = self.shard(shard)?;
        let mut log = handle.lock();
        log.term += 1;
        log.epoch += 1;
        let epoch = log.epoch;
        log.append(&self.clock, LogPayload::LeaderNoOp { epoch });
        info!(shard = %shard, term = log.term, epoch, "leader changed");
        Ok(epoch)
    }

    /// Metadata snapshot of a shard
    pub fn shard_info(&self, shard: ShardId) -> Option<ShardInfo> {
        self.shard(shard).ok().map(|h| h.lock().info())
    }

}

impl Default for ShardedLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShardedLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedLogStore")
            .field("shards", &self.shards.len())
            .field("tables", &self.tables.len())
            .field("txns", &self.txns)
            .finish()
    }
}

impl ShardLogReader for ShardedLogStore {
    fn read_log(
        &self,
        shard: ShardId,
        from: LogPosition,
        max_entries: usize,
    ) -> Result<Vec<LogEntry>> {
        Ok(self.shard(shard)?.lock().read_after(from, max_entries))
    }
}

impl TransactionResolver for ShardedLogStore {
    fn resolve_transaction(&self, txn: TxnId) -> Result<TxnOutcome> {
        self.txns.resolve(txn)
    }
}

impl ShardTopology for ShardedLogStore {
    fn shard_exists(&self, shard: ShardId) -> bool {
        self.shards.contains_key(&shard)
    }

    fn list_shards(&self) -> Vec<ShardId> {
        self.shards.iter().map(|e| *e.key()).collect()
    }

    fn list_child_shards(&self, parent: ShardId) -> Result<Vec<ShardId>> {
        Ok(self.shard(parent)?.lock().children.to_vec())
    }

    fn reclaim_shard(&self, shard: ShardId) -> Result<()> {
        {
            let handle = self.shard(shard)?;
            let log = handle.lock();
            if !log.is_split() {
                return Err(Error::InvalidArgument(format!(
                    "shard {} is not a split parent",
                    shard
                )));
            }
            let open = log.unresolved_txns();
            if !open.is_empty() {
                return Err(Error::Storage(format!(
                    "shard {} still has {} unresolved transactions",
                    shard,
                    open.len()
                )));
            }
        }
        self.shards.remove(&shard);
        info!(shard = %shard, "reclaimed split parent");
        Ok(())
    }
}

impl LeaderEpochs for ShardedLogStore {
    fn shard_leader_epoch(&self, shard: ShardId) -> Result<u64> {
        Ok(self.shard(shard)?.lock().epoch)
    }
}

impl StorageEngine for ShardedLogStore {
    fn register_commit_observer(&self, observer: Weak<dyn CommitObserver>) {
        let mut observers = self.observers.write();
        observers.retain(|o| o.strong_count() > 0);
        observers.push(observer);
    }
}
