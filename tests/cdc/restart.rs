//! Restarts: durable streams, checkpoints, and metadata recovery

use crate::*;
use std::io::Write;

#[test]
fn test_restart_mid_stream_is_exactly_once() {
    let cluster = TestCluster::durable_with(|b| b.max_stream_intent_records(4));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    for t in 0..10 {
        cluster.commit_txn("t", t * 2..t * 2 + 2);
    }

    let mut records = cluster.cdc.poll(stream, shard).unwrap().records;
    records.extend(cluster.cdc.poll(stream, shard).unwrap().records);

    let cluster = cluster.restart_with(|store| {
        store.insert("t", Value::Int(100), row(100)).unwrap();
    });
    records.extend(drain_records(&cluster.cdc, stream, shard));

    assert_consistent(&records);
    assert_eq!(count(&records, RecordKind::Ddl), 1);
    let mut expected: Vec<i64> = (0..20).collect();
    expected.push(100);
    assert_eq!(inserted_keys(&records), expected);
}

#[test]
fn test_pending_transaction_across_restart() {
    let cluster = TestCluster::durable();
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);

    let id = {
        let txn = cluster.store.begin();
        txn.insert("t", Value::Int(1), row(1)).unwrap();
        let id = txn.id();
        txn.decide_commit().unwrap();
        id
    };
    cluster.insert("t", 2);
    let held = drain_records(&cluster.cdc, stream, shard);
    assert_eq!(inserted_keys(&held), Vec::<i64>::new());

    let cluster = cluster.restart_with(|store| store.apply_commit(id).unwrap());
    let records = drain_records(&cluster.cdc, stream, shard);
    assert_consistent(&records);
    assert_eq!(inserted_keys(&records), vec![1, 2]);
}

#[test]
fn test_stream_lifecycle_survives_restart() {
    let cluster = TestCluster::durable();
    let a = cluster.table("a");
    let b = cluster.table("b");
    let kept = cluster.stream(&[a, b]);
    let eager = cluster.eager_stream(&[b]);
    let dropped = cluster.stream(&[a]);
    drain(&cluster.cdc, dropped, a);
    cluster.cdc.delete_stream(dropped).unwrap();

    let cluster = cluster.restart();
    let mut ids: Vec<StreamId> = cluster.cdc.list_streams().iter().map(|s| s.id).collect();
    ids.sort();
    let mut expected = vec![kept, eager];
    expected.sort();
    assert_eq!(ids, expected);

    assert_eq!(cluster.cdc.get_stream(kept).unwrap().shards, vec![a, b]);
    assert!(!cluster.cdc.get_stream(eager).unwrap().options.consistent_records);
    assert!(matches!(cluster.cdc.get_stream(dropped), Err(Error::StreamNotFound(_))));
    assert_eq!(cluster.cdc.recovery().streams_recovered, 2);
}

#[test]
fn test_torn_metadata_tail_is_discarded() {
    let cluster = TestCluster::durable();
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    cluster.insert("t", 1);
    let checkpoint = drain(&cluster.cdc, stream, shard).checkpoint;
    let log_path = cluster.cdc.path().unwrap().to_path_buf();

    let cluster = cluster.restart_with(|_| {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&log_path)
            .unwrap();
        // half a frame header
        file.write_all(&[0x2a, 0x00, 0x00]).unwrap();
    });

    let recovery = cluster.cdc.recovery();
    assert_eq!(recovery.torn_tail_bytes, 3);
    assert!(recovery.has_issues());
    assert_eq!(cluster.cdc.get_checkpoint(stream, shard).unwrap(), checkpoint);

    // the truncated log keeps accepting entries
    cluster.insert("t", 2);
    let next = drain(&cluster.cdc, stream, shard).checkpoint;
    let cluster = cluster.restart();
    assert_eq!(cluster.cdc.recovery().torn_tail_bytes, 0);
    assert_eq!(cluster.cdc.get_checkpoint(stream, shard).unwrap(), next);
}

#[test]
fn test_compaction_bounds_replay() {
    let cluster = TestCluster::durable_with(|b| b.compaction_threshold(16));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    for key in 0..100 {
        cluster.insert("t", key);
        cluster.cdc.poll(stream, shard).unwrap();
    }
    let checkpoint = cluster.cdc.get_checkpoint(stream, shard).unwrap();
    let mark = cluster.cdc.historical_max(shard);

    let cluster = cluster.restart();
    // each insert wrote a checkpoint and a historical mark; compaction
    // keeps the replayed log near the live state
    assert!(cluster.cdc.recovery().entries_replayed < 40);
    assert_eq!(cluster.cdc.get_checkpoint(stream, shard).unwrap(), checkpoint);
    assert_eq!(cluster.cdc.historical_max(shard), mark);
}

#[test]
fn test_config_loaded_from_file() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("cdc.toml");
    std::fs::write(
        &config_path,
        r#"
max_stream_intent_records = 2
consistent_records = true

[durability]
mode = "strict"
"#,
    )
    .unwrap();

    let config = CdcConfig::from_file(&config_path).unwrap();
    assert_eq!(config.max_stream_intent_records, 2);

    let cluster = TestCluster::with(CdcService::builder().config(config));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    cluster.commit_txn("t", 0..5);
    let first = cluster.cdc.poll(stream, shard).unwrap();
    assert!(first.truncated);
    assert_eq!(count(&first.records, RecordKind::Insert), 2);

    assert!(matches!(
        CdcConfig::from_toml_str("max_stream_intent_records = 0"),
        Err(Error::Config(_))
    ));
}
