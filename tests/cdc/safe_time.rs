//! Stream safe time: merging several shards by commit time

use crate::*;

#[test]
fn test_stream_safe_time_waits_for_every_shard() {
    let cluster = TestCluster::new();
    let a = cluster.table("a");
    let b = cluster.table("b");
    let stream = cluster.stream(&[a, b]);
    assert_eq!(cluster.cdc.stream_safe_time(stream).unwrap(), LogicalTimestamp::MIN);

    cluster.insert("a", 1);
    let on_a = cluster.cdc.poll(stream, a).unwrap();
    assert!(on_a.safe_time > LogicalTimestamp::MIN);
    // b has never been polled
    assert_eq!(cluster.cdc.stream_safe_time(stream).unwrap(), LogicalTimestamp::MIN);

    let on_b = cluster.cdc.poll(stream, b).unwrap();
    assert_eq!(
        cluster.cdc.stream_safe_time(stream).unwrap(),
        on_a.safe_time.min(on_b.safe_time)
    );
}

#[test]
fn test_open_transaction_holds_back_safe_time() {
    let cluster = TestCluster::new();
    let a = cluster.table("a");
    let b = cluster.table("b");
    let stream = cluster.stream(&[a, b]);

    let open = cluster.store.begin();
    open.insert("b", Value::Int(100), row(100)).unwrap();
    for key in 0..5 {
        cluster.insert("a", key);
    }
    drain(&cluster.cdc, stream, a);
    drain(&cluster.cdc, stream, b);
    let held = cluster.cdc.stream_safe_time(stream).unwrap();

    let commit_time = open.commit().unwrap();
    assert!(commit_time > held);

    let late = drain(&cluster.cdc, stream, b);
    assert_eq!(inserted_keys(&late.records), vec![100]);
    assert!(late.records.iter().all(|r| r.commit_time > held));
    assert!(late.checkpoint.safe_time >= commit_time);
}

#[test]
fn test_no_record_arrives_below_reported_safe_time() {
    let cluster = TestCluster::new();
    let a = cluster.table("a");
    let b = cluster.table("b");
    let stream = cluster.stream(&[a, b]);

    let mut key = 0;
    let mut safe = LogicalTimestamp::MIN;
    for round in 0..20 {
        match round % 4 {
            0 => cluster.insert("a", key),
            1 => cluster.insert("b", key),
            2 => {
                let txn = cluster.store.begin();
                txn.insert("a", Value::Int(key), row(key)).unwrap();
                txn.insert("b", Value::Int(key + 1), row(key + 1)).unwrap();
                txn.commit().unwrap();
                key += 1;
            }
            _ => {}
        }
        key += 1;

        for shard in [a, b] {
            for record in drain_records(&cluster.cdc, stream, shard) {
                assert!(
                    record.commit_time > safe,
                    "round {}: {} at {} under safe time {}",
                    round,
                    record.kind,
                    record.commit_time,
                    safe
                );
            }
        }
        let next = cluster.cdc.stream_safe_time(stream).unwrap();
        assert!(next >= safe);
        safe = next;
    }
}

#[test]
fn test_merged_shards_keep_transactions_together() {
    let cluster = TestCluster::new();
    let a = cluster.table("a");
    let b = cluster.table("b");
    let stream = cluster.stream(&[a, b]);

    cluster.insert("a", 1);
    let txn = cluster.store.begin();
    let id = txn.id();
    txn.insert("a", Value::Int(2), row(2)).unwrap();
    txn.insert("b", Value::Int(3), row(3)).unwrap();
    txn.commit().unwrap();
    cluster.insert("b", 4);
    cluster.insert("a", 5);

    let mut merged = drain_records(&cluster.cdc, stream, a);
    merged.extend(drain_records(&cluster.cdc, stream, b));
    let safe = cluster.cdc.stream_safe_time(stream).unwrap();
    merged.retain(|r| r.commit_time <= safe && r.row_change().is_some());
    merged.sort_by_key(|r| r.commit_time);

    let order: Vec<(i64, Option<TxnId>)> = merged
        .iter()
        .filter_map(|r| match r.row_change().map(|row| &row.key) {
            Some(Value::Int(k)) => Some((*k, r.txn)),
            _ => None,
        })
        .collect();
    // 5 is beyond b's horizon and waits for a later merge
    assert_eq!(order, vec![(1, None), (2, Some(id)), (3, Some(id)), (4, None)]);
}
