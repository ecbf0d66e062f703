//! Shared harness for the change-capture integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Once;

pub use std::time::Duration;
pub use strata_cdc::prelude::{
    Arc, CdcConfig, CdcService, CdcServiceBuilder, ChangeRecord, Checkpoint, Error, LogPosition,
    LogicalTimestamp, PollResponse, RecordKind, RecordPayload, ShardId, ShardedLogStore,
    SplitPhase, StreamId, StreamOptions, TxnId, Value, WriteTxn,
};
pub use tempfile::TempDir;

pub const COLUMNS: &[&str] = &["id", "v"];

static TRACING: Once = Once::new();

/// Route engine logs through the test harness
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::INFO)
            .try_init();
    });
}

// =============================================================================
// CLUSTER
// =============================================================================

/// A reference store with a change-capture service over it
pub struct TestCluster {
    pub store: Arc<ShardedLogStore>,
    pub cdc: CdcService,
    dir: Option<TempDir>,
    configure: fn(CdcServiceBuilder) -> CdcServiceBuilder,
}

impl TestCluster {
    /// In-memory service, split retention run by hand
    pub fn new() -> Self {
        Self::with(CdcService::builder())
    }

    /// In-memory service from a customised builder
    pub fn with(builder: CdcServiceBuilder) -> Self {
        init_tracing();
        let store = Arc::new(ShardedLogStore::new());
        let cdc = builder
            .manual_split_retention()
            .open(store.clone())
            .unwrap();
        Self {
            store,
            cdc,
            dir: None,
            configure: |b| b,
        }
    }

    /// Service persisting its metadata in a temporary directory
    pub fn durable() -> Self {
        Self::durable_with(|b| b)
    }

    /// Durable service; `configure` is reapplied on every restart
    pub fn durable_with(configure: fn(CdcServiceBuilder) -> CdcServiceBuilder) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ShardedLogStore::new());
        let cdc = Self::durable_builder(&dir, configure)
            .open(store.clone())
            .unwrap();
        Self {
            store,
            cdc,
            dir: Some(dir),
            configure,
        }
    }

    fn durable_builder(
        dir: &TempDir,
        configure: fn(CdcServiceBuilder) -> CdcServiceBuilder,
    ) -> CdcServiceBuilder {
        configure(CdcService::builder())
            .path(dir.path())
            .strict()
            .manual_split_retention()
    }

    /// Shut the service down and open a fresh one over the same store
    /// and metadata directory
    pub fn restart(self) -> Self {
        self.restart_with(|_| {})
    }

    /// Restart, running `while_down` against the store between shutdown
    /// and reopen
    pub fn restart_with(self, while_down: impl FnOnce(&ShardedLogStore)) -> Self {
        let TestCluster {
            store,
            cdc,
            dir,
            configure,
        } = self;
        drop(cdc);
        while_down(&store);
        let dir = dir.expect("restart needs a durable cluster");
        let cdc = Self::durable_builder(&dir, configure)
            .open(store.clone())
            .unwrap();
        Self {
            store,
            cdc,
            dir: Some(dir),
            configure,
        }
    }

    /// Metadata directory of a durable cluster
    pub fn dir(&self) -> &std::path::Path {
        self.dir.as_ref().expect("not a durable cluster").path()
    }

    /// Create a table on a new shard
    pub fn table(&self, name: &str) -> ShardId {
        self.store.create_table(name, COLUMNS).unwrap()
    }

    /// Consistent stream over `shards`
    pub fn stream(&self, shards: &[ShardId]) -> StreamId {
        self.cdc.create_stream(shards).unwrap()
    }

    /// Eager stream over `shards`
    pub fn eager_stream(&self, shards: &[ShardId]) -> StreamId {
        self.cdc
            .create_stream_with(
                shards,
                StreamOptions {
                    consistent_records: false,
                },
            )
            .unwrap()
    }

    /// Autocommit insert of `(key, key)`
    pub fn insert(&self, table: &str, key: i64) {
        self.store
            .insert(table, Value::Int(key), row(key))
            .unwrap();
    }

    /// Commit one transaction inserting every key of `keys`
    pub fn commit_txn(&self, table: &str, keys: impl IntoIterator<Item = i64>) -> TxnId {
        let txn = self.store.begin();
        let id = txn.id();
        for key in keys {
            txn.insert(table, Value::Int(key), row(key)).unwrap();
        }
        txn.commit().unwrap();
        id
    }

    /// Roll back one transaction after inserting every key of `keys`
    pub fn rollback_txn(&self, table: &str, keys: impl IntoIterator<Item = i64>) -> TxnId {
        let txn = self.store.begin();
        let id = txn.id();
        for key in keys {
            txn.insert(table, Value::Int(key), row(key)).unwrap();
        }
        txn.rollback().unwrap();
        id
    }
}

pub fn row(key: i64) -> Vec<Value> {
    vec![Value::Int(key), Value::Int(key)]
}

// =============================================================================
// DRAINING
// =============================================================================

/// Everything one shard yielded until it went quiet or reported a split
#[derive(Debug, Default)]
pub struct Drained {
    pub records: Vec<ChangeRecord>,
    pub polls: usize,
    pub truncated_polls: usize,
    /// Children named by a `ShardSplit` answer
    pub children: Vec<ShardId>,
    pub checkpoint: Checkpoint,
}

const MAX_POLLS: usize = 10_000;

/// Poll `shard` until a poll yields nothing and leaves the checkpoint
/// where it was, or the shard reports it was split
pub fn drain(cdc: &CdcService, stream: StreamId, shard: ShardId) -> Drained {
    let mut out = Drained {
        checkpoint: cdc.get_checkpoint(stream, shard).unwrap(),
        ..Drained::default()
    };
    while out.polls < MAX_POLLS {
        let batch = match cdc.poll(stream, shard) {
            Ok(batch) => batch,
            Err(Error::ShardSplit { children, .. }) => {
                out.children = children;
                return out;
            }
            Err(e) => panic!("poll of {} failed: {}", shard, e),
        };
        out.polls += 1;
        if batch.truncated {
            out.truncated_polls += 1;
        }
        let quiet =
            batch.records.is_empty() && !batch.truncated && batch.checkpoint == out.checkpoint;
        out.records.extend(batch.records);
        out.checkpoint = batch.checkpoint;
        if quiet {
            return out;
        }
    }
    panic!("shard {} did not quiesce after {} polls", shard, MAX_POLLS);
}

/// Records of `shard`, drained
pub fn drain_records(cdc: &CdcService, stream: StreamId, shard: ShardId) -> Vec<ChangeRecord> {
    drain(cdc, stream, shard).records
}

/// Drain `root` and, through split answers, every descendant shard
pub fn drain_tree(cdc: &CdcService, stream: StreamId, root: ShardId) -> Vec<ChangeRecord> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([root]);
    while let Some(shard) = queue.pop_front() {
        if !seen.insert(shard) {
            continue;
        }
        let drained = drain(cdc, stream, shard);
        records.extend(drained.records);
        queue.extend(drained.children);
    }
    records
}

// =============================================================================
// CHECKS
// =============================================================================

/// Count records per kind, indexed by `RecordKind::index`
pub fn tally(records: &[ChangeRecord]) -> [usize; 8] {
    let mut counts = [0usize; 8];
    for record in records {
        counts[record.kind.index()] += 1;
    }
    counts
}

pub fn count(records: &[ChangeRecord], kind: RecordKind) -> usize {
    tally(records)[kind.index()]
}

/// Integer keys of the inserted rows, sorted
pub fn inserted_keys(records: &[ChangeRecord]) -> Vec<i64> {
    let mut keys: Vec<i64> = records
        .iter()
        .filter(|r| r.kind == RecordKind::Insert)
        .filter_map(|r| match r.row_change().map(|row| &row.key) {
            Some(Value::Int(k)) => Some(*k),
            _ => None,
        })
        .collect();
    keys.sort_unstable();
    keys
}

/// Check the shape of a consistent stream, shard by shard:
///
/// - every row sits between one BEGIN and one COMMIT of its transaction
/// - DDL stands outside any bracket
/// - a transaction commits at most once per shard
/// - commit times never go backwards
pub fn assert_consistent(records: &[ChangeRecord]) {
    let mut open: HashMap<ShardId, Option<TxnId>> = HashMap::new();
    let mut committed: HashSet<(ShardId, TxnId)> = HashSet::new();
    let mut last_commit: HashMap<ShardId, LogicalTimestamp> = HashMap::new();

    for (i, record) in records.iter().enumerate() {
        let shard = record.shard;
        if let Some(prev) = last_commit.get(&shard) {
            assert!(
                record.commit_time >= *prev,
                "record {} ({}) commits at {} after {}",
                i,
                record.kind,
                record.commit_time,
                prev
            );
        }
        last_commit.insert(shard, record.commit_time);

        let bracket = open.get(&shard).copied();
        match record.kind {
            RecordKind::Ddl => {
                assert!(bracket.is_none(), "record {}: DDL inside a transaction", i);
            }
            RecordKind::Begin => {
                assert!(bracket.is_none(), "record {}: nested BEGIN", i);
                open.insert(shard, record.txn);
            }
            RecordKind::Commit => {
                assert_eq!(bracket, Some(record.txn), "record {}: COMMIT without BEGIN", i);
                open.remove(&shard);
                if let Some(txn) = record.txn {
                    assert!(
                        committed.insert((shard, txn)),
                        "record {}: {} committed twice on {}",
                        i,
                        txn,
                        shard
                    );
                }
            }
            kind if kind.is_dml() => {
                assert_eq!(
                    bracket,
                    Some(record.txn),
                    "record {}: {} outside its transaction",
                    i,
                    kind
                );
            }
            _ => unreachable!(),
        }
    }

    assert!(open.is_empty(), "transactions never committed: {:?}", open);
}
