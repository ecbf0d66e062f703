//! Ordering laws over generated and randomised workloads

use crate::*;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::thread;

// =============================================================================
// GENERATED OPERATION SEQUENCES
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Autocommit,
    Begin(usize),
    Write(usize),
    Commit(usize),
    Rollback(usize),
    Poll,
}

const SLOTS: usize = 3;

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::Autocommit),
        2 => (0..SLOTS).prop_map(Op::Begin),
        4 => (0..SLOTS).prop_map(Op::Write),
        2 => (0..SLOTS).prop_map(Op::Commit),
        1 => (0..SLOTS).prop_map(Op::Rollback),
        2 => Just(Op::Poll),
    ]
}

struct Slot<'a> {
    txn: WriteTxn<'a>,
    keys: Vec<i64>,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Interleaved writers and polls deliver exactly the committed rows,
    /// bracketed, in commit order
    #[test]
    fn prop_stream_equals_committed_rows(
        ops in prop::collection::vec(op(), 1..80),
        max_records in 1usize..8,
        max_scan in 2usize..16,
    ) {
        let cluster = TestCluster::with(
            CdcService::builder()
                .max_stream_intent_records(max_records)
                .max_log_scan_entries(max_scan),
        );
        let shard = cluster.table("t");
        let stream = cluster.stream(&[shard]);

        let mut slots: Vec<Option<Slot<'_>>> = (0..SLOTS).map(|_| None).collect();
        let mut next_key = 0i64;
        let mut committed = Vec::new();
        let mut records = Vec::new();

        for op in ops {
            match op {
                Op::Autocommit => {
                    cluster.insert("t", next_key);
                    committed.push(next_key);
                    next_key += 1;
                }
                Op::Begin(i) => {
                    if slots[i].is_none() {
                        slots[i] = Some(Slot { txn: cluster.store.begin(), keys: Vec::new() });
                    }
                }
                Op::Write(i) => {
                    if let Some(slot) = slots[i].as_mut() {
                        slot.txn.insert("t", Value::Int(next_key), row(next_key)).unwrap();
                        slot.keys.push(next_key);
                        next_key += 1;
                    }
                }
                Op::Commit(i) => {
                    if let Some(slot) = slots[i].take() {
                        slot.txn.commit().unwrap();
                        committed.extend(slot.keys);
                    }
                }
                Op::Rollback(i) => {
                    if let Some(slot) = slots[i].take() {
                        slot.txn.rollback().unwrap();
                    }
                }
                Op::Poll => records.extend(cluster.cdc.poll(stream, shard).unwrap().records),
            }
        }
        for slot in slots.iter_mut() {
            if let Some(slot) = slot.take() {
                slot.txn.commit().unwrap();
                committed.extend(slot.keys);
            }
        }

        records.extend(drain_records(&cluster.cdc, stream, shard));
        assert_consistent(&records);
        committed.sort_unstable();
        prop_assert_eq!(inserted_keys(&records), committed);
        prop_assert_eq!(count(&records, RecordKind::Ddl), 1);

        // a drained stream stays drained
        let again = cluster.cdc.poll(stream, shard).unwrap();
        prop_assert!(again.records.is_empty());
    }

    /// Replaying from any checkpoint the stream passed through yields a
    /// suffix of the original delivery
    #[test]
    fn prop_replay_from_checkpoint_is_suffix(
        txn_sizes in prop::collection::vec(0usize..6, 1..20),
        max_records in 1usize..6,
        pick in any::<prop::sample::Index>(),
    ) {
        let cluster =
            TestCluster::with(CdcService::builder().max_stream_intent_records(max_records));
        let shard = cluster.table("t");
        let stream = cluster.stream(&[shard]);

        let mut key = 0i64;
        for size in txn_sizes {
            if size == 0 {
                cluster.insert("t", key);
                key += 1;
            } else {
                cluster.commit_txn("t", key..key + size as i64);
                key += size as i64;
            }
        }

        let mut checkpoints = vec![(cluster.cdc.get_checkpoint(stream, shard).unwrap(), 0usize)];
        let mut records = Vec::new();
        loop {
            let batch = cluster.cdc.poll(stream, shard).unwrap();
            let quiet = batch.records.is_empty() && !batch.truncated;
            records.extend(batch.records);
            checkpoints.push((batch.checkpoint, records.len()));
            if quiet {
                break;
            }
        }

        let (from, offset) = checkpoints[pick.index(checkpoints.len())];
        let mut replay = Vec::new();
        let mut checkpoint = from;
        loop {
            let batch = cluster.cdc.poll_from(stream, shard, checkpoint).unwrap();
            let quiet = batch.records.is_empty() && !batch.truncated;
            replay.extend(batch.records);
            checkpoint = batch.checkpoint;
            if quiet {
                break;
            }
        }
        prop_assert_eq!(&replay[..], &records[offset..]);
    }
}

// =============================================================================
// RANDOMISED CONCURRENT WORKLOAD WITH A SPLIT
// =============================================================================

fn run_worker(store: Arc<ShardedLogStore>, worker: i64, seed: u64) -> Vec<i64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut committed = Vec::new();
    let mut key = worker * 100_000;
    for _ in 0..60 {
        let rows = rng.gen_range(0..5);
        if rows == 0 {
            store.insert("t", Value::Int(key), row(key)).unwrap();
            committed.push(key);
            key += 1;
            continue;
        }
        let txn = store.begin();
        let keys: Vec<i64> = (key..key + rows).collect();
        key += rows;
        for k in &keys {
            txn.insert("t", Value::Int(*k), row(*k)).unwrap();
            if rng.gen_bool(0.2) {
                thread::yield_now();
            }
        }
        if rng.gen_bool(0.8) {
            txn.commit().unwrap();
            committed.extend(keys);
        } else {
            txn.rollback().unwrap();
        }
    }
    committed
}

#[test]
fn test_random_workload_across_split_is_exactly_once() {
    for seed in [7u64, 1_234, 99_991] {
        let cluster = TestCluster::with(CdcService::builder().max_stream_intent_records(16));
        let root = cluster.table("t");
        let stream = cluster.stream(&[root]);

        let workers: Vec<_> = (0..3i64)
            .map(|w| {
                let store = Arc::clone(&cluster.store);
                thread::spawn(move || run_worker(store, w, seed + w as u64))
            })
            .collect();

        let mut rng = StdRng::seed_from_u64(seed);
        let mut early = Vec::new();
        for _ in 0..rng.gen_range(1..20) {
            early.extend(cluster.cdc.poll(stream, root).unwrap().records);
        }
        let (lower, _) = cluster.store.split_shard(root).unwrap();

        let mut expected = Vec::new();
        for handle in workers {
            expected.extend(handle.join().unwrap());
        }
        if rng.gen_bool(0.5) {
            cluster.store.split_shard(lower).unwrap();
        }

        let mut records = early;
        records.extend(drain_tree(&cluster.cdc, stream, root));
        assert_consistent(&records);
        expected.sort_unstable();
        assert_eq!(inserted_keys(&records), expected, "seed {}", seed);

        // every drained parent is reclaimable now
        assert!(cluster.cdc.run_split_retention().unwrap() >= 1);
        assert_eq!(
            cluster.cdc.split_state(root).unwrap().phase,
            SplitPhase::ParentDeleted
        );
    }
}
