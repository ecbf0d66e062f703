//! Shard-split handoff
//!
//! ## Phases of a split parent
//!
//! ```text
//! Active ──marker seen──▶ Splitting ──children listed──▶ ParentDraining
//!                                                            │
//!                      every stream on the parent drained    │
//!                      children handed off, log reclaimed    ▼
//!                                                      ParentDeleted
//! ```
//!
//! A stream is drained on a parent once its checkpoint has reached the
//! split marker and nothing is left to read after it. Pending transactions
//! with pre-split writes keep their Apply/Abort on the parent, so a stream
//! keeps polling the parent until they resolve.
//!
//! A child's initial checkpoint for any stream is the split marker's
//! position and time: the child's log continues after the marker's index
//! and contains only post-split data.

use dashmap::DashMap;
use std::sync::Arc;
use strata_core::traits::{ShardLogReader, ShardTopology};
use strata_core::{Checkpoint, Error, LogPayload, LogPosition, Result, ShardId};
use strata_durability::{MetaEntry, MetaLog, MetaState, SplitPhase, SplitRecord};
use tracing::info;

use crate::assembler::SplitMarker;

/// Split-handoff state of every known split parent
pub struct SplitHandoff {
    meta: Arc<MetaLog>,
    records: DashMap<ShardId, SplitRecord>,
    /// child -> parent
    parents: DashMap<ShardId, ShardId>,
}

impl SplitHandoff {
    /// Empty handoff state persisting to `meta`
    pub fn new(meta: Arc<MetaLog>) -> Self {
        Self {
            meta,
            records: DashMap::new(),
            parents: DashMap::new(),
        }
    }

    /// Load recovered split records
    pub fn restore(&self, state: &MetaState) {
        for record in state.splits.values() {
            self.index(record.clone());
        }
    }

    fn index(&self, record: SplitRecord) {
        for child in &record.children {
            self.parents.insert(*child, record.parent);
        }
        self.records.insert(record.parent, record);
    }

    fn store(&self, record: SplitRecord) -> Result<()> {
        let previous = self.records.get(&record.parent).map(|r| r.clone());
        self.index(record.clone());
        if let Err(e) = self.meta.append(&MetaEntry::SplitPhase(record.clone())) {
            match previous {
                Some(previous) => self.index(previous),
                None => {
                    self.records.remove(&record.parent);
                    for child in &record.children {
                        self.parents.remove(child);
                    }
                }
            }
            return Err(Error::from(e));
        }
        info!(
            parent = %record.parent,
            phase = ?record.phase,
            children = record.children.len(),
            split_position = %record.split_position,
            "split phase"
        );
        Ok(())
    }

    /// Split record of `parent`
    pub fn get(&self, parent: ShardId) -> Option<SplitRecord> {
        self.records.get(&parent).map(|r| r.clone())
    }

    /// Parent of a split child
    pub fn parent_of(&self, child: ShardId) -> Option<ShardId> {
        self.parents.get(&child).map(|p| *p)
    }

    /// Whether `shard` descends from `ancestor` through recorded splits
    pub fn descends_from(&self, shard: ShardId, ancestor: ShardId) -> bool {
        let mut current = shard;
        while let Some(parent) = self.parent_of(current) {
            if parent == ancestor {
                return true;
            }
            current = parent;
        }
        false
    }

    /// Record a split marker read from `parent`'s log
    ///
    /// Moves the parent to `Splitting`, or straight to `ParentDraining`
    /// when `children` is already known. Never moves a record backwards.
    pub fn observe_marker(
        &self,
        parent: ShardId,
        marker: &SplitMarker,
        children: Vec<ShardId>,
    ) -> Result<SplitRecord> {
        let children = if children.is_empty() {
            marker.children.clone()
        } else {
            children
        };
        let phase = if children.is_empty() {
            SplitPhase::Splitting
        } else {
            SplitPhase::ParentDraining
        };
        match self.get(parent) {
            Some(existing) if existing.phase >= phase => Ok(existing),
            _ => {
                let record = SplitRecord {
                    parent,
                    children,
                    split_position: marker.position,
                    split_time: marker.timestamp,
                    phase,
                };
                self.store(record.clone())?;
                Ok(record)
            }
        }
    }

    /// Find the split record of `shard`, learning it from the store if needed
    ///
    /// Returns `None` for a shard that has not split.
    pub fn discover<E>(
        &self,
        engine: &E,
        shard: ShardId,
        scan_limit: usize,
    ) -> Result<Option<SplitRecord>>
    where
        E: ShardLogReader + ShardTopology + ?Sized,
    {
        if let Some(record) = self.get(shard) {
            if record.phase >= SplitPhase::ParentDraining {
                return Ok(Some(record));
            }
        }
        if !engine.shard_exists(shard) {
            return Ok(self.get(shard));
        }
        let children = engine.list_child_shards(shard)?;
        if children.is_empty() {
            return Ok(self.get(shard));
        }

        let mut cursor = LogPosition::INVALID;
        loop {
            let chunk = engine.read_log(shard, cursor, scan_limit.max(1))?;
            let last = match chunk.last() {
                Some(entry) => entry.position,
                None => break,
            };
            for entry in &chunk {
                if let LogPayload::Split { children: named } = &entry.payload {
                    let marker = SplitMarker {
                        position: entry.position,
                        timestamp: entry.timestamp,
                        children: named.to_vec(),
                    };
                    return self.observe_marker(shard, &marker, children).map(Some);
                }
            }
            cursor = last;
        }
        Err(Error::Internal(format!(
            "shard {} lists children but has no split marker",
            shard
        )))
    }

    /// Starting checkpoint of a split child
    pub fn child_checkpoint(record: &SplitRecord) -> Checkpoint {
        Checkpoint {
            position: record.split_position,
            safe_time: record.split_time,
            resume: None,
        }
    }

    /// Whether a stream at `checkpoint` has consumed everything on the parent
    pub fn is_drained<R>(reader: &R, record: &SplitRecord, checkpoint: &Checkpoint) -> Result<bool>
    where
        R: ShardLogReader + ?Sized,
    {
        if record.phase == SplitPhase::ParentDeleted {
            return Ok(true);
        }
        if checkpoint.resume.is_some() || checkpoint.position < record.split_position {
            return Ok(false);
        }
        match reader.read_log(record.parent, checkpoint.position, 1) {
            Ok(rest) => Ok(rest.is_empty()),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Parents waiting for their streams to drain
    pub fn draining(&self) -> Vec<SplitRecord> {
        self.records
            .iter()
            .filter(|r| r.phase == SplitPhase::ParentDraining)
            .map(|r| r.clone())
            .collect()
    }

    /// Mark `parent` reclaimed
    pub fn mark_deleted(&self, parent: ShardId) -> Result<()> {
        match self.get(parent) {
            Some(record) if record.phase < SplitPhase::ParentDeleted => self.store(SplitRecord {
                phase: SplitPhase::ParentDeleted,
                ..record
            }),
            Some(_) => Ok(()),
            None => Err(Error::ShardNotFound(parent)),
        }
    }

    /// Entries reproducing the current records
    pub fn snapshot_into(&self, out: &mut Vec<MetaEntry>) {
        for record in self.records.iter() {
            out.push(MetaEntry::SplitPhase(record.clone()));
        }
    }
}

impl std::fmt::Debug for SplitHandoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitHandoff")
            .field("records", &self.records.len())
            .finish()
    }
}
