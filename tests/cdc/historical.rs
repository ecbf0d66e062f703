//! Historical high-water mark per shard

use crate::*;
use std::thread;
use strata_cdc::core::traits::ShardLogReader;

fn last_position(cluster: &TestCluster, shard: ShardId) -> LogPosition {
    cluster.store.shard_info(shard).unwrap().last_position
}

#[test]
fn test_mark_tracks_commits_without_any_stream() {
    let cluster = TestCluster::new();
    let shard = cluster.table("t");
    assert_eq!(cluster.cdc.historical_max(shard), LogPosition::INVALID);

    cluster.insert("t", 1);
    assert_eq!(cluster.cdc.historical_max(shard), last_position(&cluster, shard));

    cluster.commit_txn("t", [2, 3]);
    let committed = last_position(&cluster, shard);
    assert_eq!(cluster.cdc.historical_max(shard), committed);

    cluster.rollback_txn("t", [4]);
    assert_eq!(cluster.cdc.historical_max(shard), committed);
    assert!(last_position(&cluster, shard) > committed);
}

#[test]
fn test_pending_writes_do_not_raise_mark() {
    let cluster = TestCluster::new();
    let shard = cluster.table("t");
    cluster.insert("t", 1);
    let mark = cluster.cdc.historical_max(shard);

    let txn = cluster.store.begin();
    txn.insert("t", Value::Int(2), row(2)).unwrap();
    assert_eq!(cluster.cdc.historical_max(shard), mark);

    txn.commit().unwrap();
    assert!(cluster.cdc.historical_max(shard) > mark);
}

#[test]
fn test_mark_is_monotonic_under_concurrent_commits() {
    let cluster = TestCluster::new();
    let shard = cluster.table("t");
    let writers: Vec<_> = (0..4i64)
        .map(|w| {
            let store = Arc::clone(&cluster.store);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = w * 1000 + i;
                    if i % 5 == 0 {
                        let txn = store.begin();
                        txn.insert("t", Value::Int(key), row(key)).unwrap();
                        txn.rollback().unwrap();
                    } else {
                        store.insert("t", Value::Int(key), row(key)).unwrap();
                    }
                }
            })
        })
        .collect();

    let mut previous = LogPosition::INVALID;
    loop {
        let finished = writers.iter().all(|h| h.is_finished());
        let mark = cluster.cdc.historical_max(shard);
        assert!(mark >= previous, "mark went from {} back to {}", previous, mark);
        previous = mark;
        if finished {
            break;
        }
    }
    for handle in writers {
        handle.join().unwrap();
    }

    let log = cluster
        .store
        .read_log(shard, LogPosition::INVALID, usize::MAX)
        .unwrap();
    let last_commit = log
        .iter()
        .rev()
        .find(|e| e.is_commit())
        .map(|e| e.position)
        .unwrap();
    assert_eq!(cluster.cdc.historical_max(shard), last_commit);
}

#[test]
fn test_mark_survives_restart() {
    let cluster = TestCluster::durable();
    let shard = cluster.table("t");
    cluster.commit_txn("t", [1, 2]);
    let mark = cluster.cdc.historical_max(shard);

    let cluster = cluster.restart();
    assert_eq!(cluster.cdc.historical_max(shard), mark);
    assert!(cluster.cdc.recovery().historical_marks_recovered >= 1);

    // a second restart with nothing new changes nothing
    let cluster = cluster.restart();
    assert_eq!(cluster.cdc.historical_max(shard), mark);
}

#[test]
fn test_mark_catches_up_on_commits_made_while_down() {
    let cluster = TestCluster::durable();
    let shard = cluster.table("t");
    cluster.insert("t", 1);
    let before = cluster.cdc.historical_max(shard);

    let cluster = cluster.restart_with(|store| {
        store.insert("t", Value::Int(2), row(2)).unwrap();
        let txn = store.begin();
        txn.insert("t", Value::Int(3), row(3)).unwrap();
        txn.rollback().unwrap();
    });

    let after = cluster.cdc.historical_max(shard);
    assert!(after > before);
    // the trailing abort is not a commit
    assert!(after < last_position(&cluster, shard));
}

#[test]
fn test_split_children_get_their_own_marks() {
    let cluster = TestCluster::new();
    let parent = cluster.table("t");
    cluster.insert("t", 1);
    let parent_mark = cluster.cdc.historical_max(parent);

    let (lower, upper) = cluster.store.split_shard(parent).unwrap();
    assert_eq!(cluster.cdc.historical_max(lower), LogPosition::INVALID);
    assert_eq!(cluster.cdc.historical_max(upper), LogPosition::INVALID);

    for key in 0..32 {
        cluster.insert("t", key);
    }
    assert_eq!(cluster.cdc.historical_max(parent), parent_mark);
    assert!(cluster.cdc.historical_max(lower).is_valid());
    assert!(cluster.cdc.historical_max(upper).is_valid());
    // children continue the parent's index sequence
    assert!(cluster.cdc.historical_max(lower) > parent_mark);
}
