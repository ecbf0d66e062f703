//! Per-poll budgets: row budget, scan window, and resumed transactions

use crate::*;

fn budget(n: usize) -> CdcServiceBuilder {
    CdcService::builder().max_stream_intent_records(n)
}

#[test]
fn test_large_transaction_spans_polls() {
    let cluster = TestCluster::with(budget(50));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    let txn = cluster.commit_txn("t", 0..120);

    let first = cluster.cdc.poll(stream, shard).unwrap();
    assert!(first.truncated);
    assert_eq!(count(&first.records, RecordKind::Ddl), 1);
    assert_eq!(count(&first.records, RecordKind::Begin), 1);
    assert_eq!(count(&first.records, RecordKind::Insert), 50);
    assert_eq!(count(&first.records, RecordKind::Commit), 0);
    let resume = first.checkpoint.resume.unwrap();
    assert_eq!(resume.txn, txn);
    assert_eq!(resume.emitted, 50);

    let second = cluster.cdc.poll(stream, shard).unwrap();
    assert!(second.truncated);
    assert_eq!(second.records.len(), 50);
    assert!(second.records.iter().all(|r| r.kind == RecordKind::Insert));
    assert_eq!(second.checkpoint.resume.unwrap().emitted, 100);

    let third = cluster.cdc.poll(stream, shard).unwrap();
    assert!(!third.truncated);
    assert_eq!(count(&third.records, RecordKind::Insert), 20);
    assert_eq!(third.records.last().unwrap().kind, RecordKind::Commit);
    assert!(third.checkpoint.resume.is_none());

    let mut all = first.records;
    all.extend(second.records);
    all.extend(third.records);
    assert_consistent(&all);
    assert_eq!(inserted_keys(&all), (0..120).collect::<Vec<_>>());
}

#[test]
fn test_budget_stops_between_transactions() {
    let cluster = TestCluster::with(budget(50));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    for t in 0..30 {
        cluster.commit_txn("t", t * 3..t * 3 + 3);
    }

    let mut all = Vec::new();
    loop {
        let batch = cluster.cdc.poll(stream, shard).unwrap();
        // whole transactions only
        assert_consistent(&batch.records);
        assert!(count(&batch.records, RecordKind::Insert) <= 50);
        assert!(batch.checkpoint.resume.is_none());
        let done = !batch.truncated;
        all.extend(batch.records);
        if done {
            break;
        }
    }
    assert_eq!(count(&all, RecordKind::Begin), 30);
    assert_eq!(inserted_keys(&all), (0..90).collect::<Vec<_>>());
}

#[test]
fn test_small_scan_window_still_drains() {
    let cluster = TestCluster::with(budget(50).max_log_scan_entries(4));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);

    cluster.insert("t", 0);
    cluster.commit_txn("t", 1..11);
    let open = cluster.store.begin();
    open.insert("t", Value::Int(100), row(100)).unwrap();
    for key in 11..20 {
        cluster.insert("t", key);
    }
    open.commit().unwrap();

    let drained = drain(&cluster.cdc, stream, shard);
    assert_consistent(&drained.records);
    let mut expected: Vec<i64> = (0..20).collect();
    expected.push(100);
    assert_eq!(inserted_keys(&drained.records), expected);
    assert!(drained.polls > 3);
}

#[test]
fn test_paginated_transaction_resumes_after_restart() {
    let cluster = TestCluster::durable_with(|b| b.max_stream_intent_records(10));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    cluster.commit_txn("t", 0..25);

    let first = cluster.cdc.poll(stream, shard).unwrap();
    assert_eq!(first.checkpoint.resume.unwrap().emitted, 10);

    let cluster = cluster.restart();
    assert_eq!(cluster.cdc.get_checkpoint(stream, shard).unwrap(), first.checkpoint);

    let mut all = first.records;
    all.extend(drain_records(&cluster.cdc, stream, shard));
    assert_consistent(&all);
    assert_eq!(count(&all, RecordKind::Begin), 1);
    assert_eq!(inserted_keys(&all), (0..25).collect::<Vec<_>>());
}

#[test]
fn test_truncated_poll_safe_time_covers_only_emitted() {
    let cluster = TestCluster::with(budget(1));
    let shard = cluster.table("t");
    let stream = cluster.stream(&[shard]);
    cluster.insert("t", 1);
    cluster.insert("t", 2);

    let first = cluster.cdc.poll(stream, shard).unwrap();
    assert!(first.truncated);
    assert_eq!(inserted_keys(&first.records), vec![1]);
    let emitted = first.records.last().unwrap().commit_time;
    assert_eq!(first.safe_time, emitted);

    let second = cluster.cdc.poll(stream, shard).unwrap();
    assert_eq!(inserted_keys(&second.records), vec![2]);
    assert!(second.safe_time > first.safe_time);
}
