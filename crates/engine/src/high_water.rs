//! Historical high-water mark
//!
//! Per shard, the log position of the latest commit ever applied, or
//! `LogPosition::INVALID` if the shard has not seen one. The tracker is a
//! [`CommitObserver`]: the storage engine calls it on the commit-apply path
//! while it still holds the shard's log, so marks arrive in log order and a
//! monotonic compare-and-set is all the synchronization needed. Aborts never
//! reach it.
//!
//! Marks are independent of streams and are not inherited across a split:
//! a child starts at `INVALID` and advances on its own first commit.

use dashmap::DashMap;
use std::sync::Arc;
use strata_core::traits::{CommitObserver, ShardLogReader, ShardTopology};
use strata_core::{Error, LogPosition, Result, ShardId};
use strata_durability::{MetaEntry, MetaLog, MetaState};
use tracing::{debug, error, info};

/// Per-shard high-water mark of committed positions
pub struct HistoricalMaxTracker {
    meta: Arc<MetaLog>,
    marks: DashMap<ShardId, LogPosition>,
}

impl HistoricalMaxTracker {
    /// Empty tracker persisting to `meta`
    pub fn new(meta: Arc<MetaLog>) -> Self {
        Self {
            meta,
            marks: DashMap::new(),
        }
    }

    /// Load recovered marks
    pub fn restore(&self, state: &MetaState) {
        for (shard, position) in &state.historical {
            self.marks.insert(*shard, *position);
        }
    }

    /// Mark of `shard`, `INVALID` if it has never committed
    pub fn get(&self, shard: ShardId) -> LogPosition {
        self.marks
            .get(&shard)
            .map(|p| *p)
            .unwrap_or(LogPosition::INVALID)
    }

    /// Raise the mark of `shard` to `position`
    ///
    /// Returns whether the mark moved.
    pub fn observe(&self, shard: ShardId, position: LogPosition) -> Result<bool> {
        let previous = {
            let mut mark = self.marks.entry(shard).or_insert(LogPosition::INVALID);
            if position <= *mark {
                return Ok(false);
            }
            std::mem::replace(&mut *mark, position)
        };

        if let Err(e) = self.meta.append(&MetaEntry::HistoricalMax { shard, position }) {
            // only undo if nothing newer landed meanwhile
            if let Some(mut mark) = self.marks.get_mut(&shard) {
                if *mark == position {
                    *mark = previous;
                }
            }
            return Err(Error::from(e));
        }
        Ok(true)
    }

    /// Raise marks from commits already in the shard logs
    ///
    /// Reads every live shard above its mark; used on open to pick up
    /// commits applied while no tracker was registered.
    pub fn catch_up<E>(&self, engine: &E, scan_limit: usize) -> Result<usize>
    where
        E: ShardLogReader + ShardTopology + ?Sized,
    {
        let mut raised = 0;
        for shard in engine.list_shards() {
            let mut cursor = self.get(shard);
            let mut latest = None;
            loop {
                let chunk = match engine.read_log(shard, cursor, scan_limit.max(1)) {
                    Ok(chunk) => chunk,
                    Err(e) if e.is_not_found() => break,
                    Err(e) => return Err(e),
                };
                let last = match chunk.last() {
                    Some(entry) => entry.position,
                    None => break,
                };
                if let Some(commit) = chunk.iter().rev().find(|e| e.is_commit()) {
                    latest = Some(commit.position);
                }
                cursor = last;
            }
            if let Some(position) = latest {
                if self.observe(shard, position)? {
                    raised += 1;
                }
            }
        }
        if raised > 0 {
            info!(shards = raised, "historical marks caught up from shard logs");
        }
        Ok(raised)
    }

    /// Entries reproducing the current marks
    pub fn snapshot_into(&self, out: &mut Vec<MetaEntry>) {
        for mark in self.marks.iter() {
            if mark.is_valid() {
                out.push(MetaEntry::HistoricalMax {
                    shard: *mark.key(),
                    position: *mark.value(),
                });
            }
        }
    }
}

impl CommitObserver for HistoricalMaxTracker {
    fn on_commit_applied(&self, shard: ShardId, position: LogPosition) {
        match self.observe(shard, position) {
            Ok(true) => debug!(shard = %shard, position = %position, "historical mark raised"),
            Ok(false) => {}
            Err(e) => error!(
                shard = %shard,
                position = %position,
                error = %e,
                "failed to persist historical mark"
            ),
        }
    }
}

impl std::fmt::Debug for HistoricalMaxTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoricalMaxTracker")
            .field("shards", &self.marks.len())
            .finish()
    }
}
