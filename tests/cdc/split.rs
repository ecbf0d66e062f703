//! Shard splits: parent drain, child handoff, and parent reclamation

use crate::*;
use std::time::Instant;

#[test]
fn test_split_handoff_is_exactly_once() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let stream = cluster.stream(&[root]);
    for key in 0..20 {
        cluster.insert("t", key);
    }
    let head = drain_records(&cluster.cdc, stream, root);

    cluster.commit_txn("t", 20..30);
    let (lower, upper) = cluster.store.split_shard(root).unwrap();
    for key in 30..60 {
        cluster.insert("t", key);
    }
    cluster.commit_txn("t", 60..70);

    let parent = drain(&cluster.cdc, stream, root);
    assert_eq!(parent.children, vec![lower, upper]);
    assert_eq!(inserted_keys(&parent.records), (20..30).collect::<Vec<_>>());

    let mut records = head;
    records.extend(parent.records);
    for child in [lower, upper] {
        let drained = drain(&cluster.cdc, stream, child);
        assert!(drained.children.is_empty());
        // each child opens with its own copy of the table definition
        assert_eq!(drained.records[0].kind, RecordKind::Ddl);
        records.extend(drained.records);
    }
    assert_consistent(&records);
    assert_eq!(count(&records, RecordKind::Ddl), 3);
    assert_eq!(inserted_keys(&records), (0..70).collect::<Vec<_>>());
}

#[test]
fn test_pending_transaction_keeps_parent_open() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let stream = cluster.stream(&[root]);

    let txn = cluster.store.begin();
    let id = txn.id();
    txn.insert("t", Value::Int(1), row(1)).unwrap();
    cluster.store.split_shard(root).unwrap();
    // post-split write lands on a child
    txn.insert("t", Value::Int(2), row(2)).unwrap();

    let held = drain(&cluster.cdc, stream, root);
    assert!(held.children.is_empty());
    assert_eq!(inserted_keys(&held.records), Vec::<i64>::new());
    assert_eq!(
        cluster.cdc.split_state(root).unwrap().phase,
        SplitPhase::ParentDraining
    );
    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 0);

    let commit_time = txn.commit().unwrap();
    let parent = drain(&cluster.cdc, stream, root);
    assert_eq!(inserted_keys(&parent.records), vec![1]);
    assert_eq!(parent.children.len(), 2);

    let mut child_records = Vec::new();
    for child in &parent.children {
        child_records.extend(drain_records(&cluster.cdc, stream, *child));
    }
    assert_consistent(&child_records);
    assert_eq!(inserted_keys(&child_records), vec![2]);
    let commit = child_records
        .iter()
        .find(|r| r.kind == RecordKind::Commit)
        .unwrap();
    assert_eq!(commit.txn, Some(id));
    assert_eq!(commit.commit_time, commit_time);

    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 1);
}

#[test]
fn test_pollable_shards_follow_the_handoff() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let stream = cluster.stream(&[root]);
    cluster.insert("t", 1);

    let before = cluster.cdc.list_pollable_shards(stream, root).unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].shard, root);

    let (lower, upper) = cluster.store.split_shard(root).unwrap();
    let during: Vec<ShardId> = cluster
        .cdc
        .list_pollable_shards(stream, root)
        .unwrap()
        .iter()
        .map(|p| p.shard)
        .collect();
    assert_eq!(during, vec![root, lower, upper]);

    drain(&cluster.cdc, stream, root);
    let after = cluster.cdc.list_pollable_shards(stream, root).unwrap();
    let marker = cluster.cdc.split_state(root).unwrap();
    assert_eq!(after.len(), 2);
    for (pollable, child) in after.iter().zip([lower, upper]) {
        assert_eq!(pollable.shard, child);
        assert_eq!(pollable.checkpoint.position, marker.split_position);
        assert_eq!(pollable.checkpoint.safe_time, marker.split_time);
    }
}

#[test]
fn test_unpolled_stream_blocks_reclamation() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let fast = cluster.stream(&[root]);
    let slow = cluster.stream(&[root]);
    cluster.insert("t", 1);
    cluster.store.split_shard(root).unwrap();

    drain(&cluster.cdc, fast, root);
    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 0);
    assert!(cluster.store.shard_info(root).is_some());

    let late = drain(&cluster.cdc, slow, root);
    assert_eq!(inserted_keys(&late.records), vec![1]);
    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 1);
    assert!(cluster.store.shard_info(root).is_none());
}

#[test]
fn test_reclaimed_parent_answers_with_children() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let stream = cluster.stream(&[root]);
    cluster.insert("t", 1);
    let (lower, upper) = cluster.store.split_shard(root).unwrap();
    drain(&cluster.cdc, stream, root);
    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 1);

    match cluster.cdc.poll(stream, root) {
        Err(Error::ShardSplit { parent, children }) => {
            assert_eq!(parent, root);
            assert_eq!(children, vec![lower, upper]);
        }
        other => panic!("expected a split answer, got {:?}", other.map(|r| r.records.len())),
    }
    // children were handed their starting checkpoints
    let record = cluster.cdc.split_state(root).unwrap();
    for child in [lower, upper] {
        let checkpoint = cluster.cdc.get_checkpoint(stream, child).unwrap();
        assert_eq!(checkpoint.position, record.split_position);
    }
}

#[test]
fn test_grandchild_split_is_exactly_once() {
    let cluster = TestCluster::new();
    let root = cluster.table("t");
    let stream = cluster.stream(&[root]);
    for key in 0..10 {
        cluster.insert("t", key);
    }
    let (lower, _upper) = cluster.store.split_shard(root).unwrap();
    for key in 10..20 {
        cluster.insert("t", key);
    }
    cluster.store.split_shard(lower).unwrap();
    for key in 20..30 {
        cluster.insert("t", key);
    }
    cluster.commit_txn("t", 30..40);

    let records = drain_tree(&cluster.cdc, stream, root);
    assert_consistent(&records);
    // one definition per shard in the tree: root, two children, two grandchildren
    assert_eq!(count(&records, RecordKind::Ddl), 5);
    assert_eq!(inserted_keys(&records), (0..40).collect::<Vec<_>>());

    assert_eq!(cluster.cdc.run_split_retention().unwrap(), 2);
    assert_eq!(cluster.cdc.split_state(lower).unwrap().phase, SplitPhase::ParentDeleted);
}

#[test]
fn test_background_retention_reclaims_parent() {
    init_tracing();
    let store = Arc::new(ShardedLogStore::new());
    let root = store.create_table("t", COLUMNS).unwrap();
    let cdc = CdcService::builder()
        .parent_deletion_retry(Duration::from_millis(5))
        .open(store.clone())
        .unwrap();
    let stream = cdc.create_stream(&[root]).unwrap();
    store.insert("t", Value::Int(1), row(1)).unwrap();
    store.split_shard(root).unwrap();

    let drained = drain(&cdc, stream, root);
    assert_eq!(drained.children.len(), 2);
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let phase = cdc.split_state(root).map(|r| r.phase);
        if phase == Some(SplitPhase::ParentDeleted) {
            break;
        }
        assert!(Instant::now() < deadline, "parent never reclaimed: {:?}", phase);
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(store.shard_info(root).is_none());
    assert!(cdc.poll(stream, root).unwrap_err().is_split());
}
