//! Stream and checkpoint store
//!
//! In-memory index of streams and their per-shard checkpoints, backed by the
//! metadata log. Every mutation updates memory first and then appends the
//! matching [`MetaEntry`]; if the append fails the memory change is undone
//! and the error surfaces. A compaction snapshot taken in between therefore
//! already contains the change, and the later append is a harmless repeat.
//!
//! Writes to one (stream, shard) checkpoint must be serialized by the
//! caller through [`StreamStore::poll_lock`].

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::{Checkpoint, Error, Result, ShardId, StreamId};
use strata_durability::{MetaEntry, MetaLog, MetaState, StreamOptions};
use tracing::{debug, info};

/// A stream's definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream id
    pub id: StreamId,
    /// Shards the stream was created over
    pub shards: Vec<ShardId>,
    /// Emission options
    pub options: StreamOptions,
}

/// A checkpoint with the leader epoch it was written under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredCheckpoint {
    /// The checkpoint
    pub checkpoint: Checkpoint,
    /// Leader epoch of the shard when it was written
    pub epoch: u64,
}

type Key = (StreamId, ShardId);

/// Durable index of streams and checkpoints
pub struct StreamStore {
    meta: Arc<MetaLog>,
    streams: DashMap<StreamId, StreamInfo>,
    checkpoints: DashMap<Key, StoredCheckpoint>,
    poll_locks: DashMap<Key, Arc<Mutex<()>>>,
}

impl StreamStore {
    /// Empty store persisting to `meta`
    pub fn new(meta: Arc<MetaLog>) -> Self {
        Self {
            meta,
            streams: DashMap::new(),
            checkpoints: DashMap::new(),
            poll_locks: DashMap::new(),
        }
    }

    /// Load recovered streams and checkpoints
    pub fn restore(&self, state: &MetaState) {
        for (id, stream) in &state.streams {
            self.streams.insert(
                *id,
                StreamInfo {
                    id: *id,
                    shards: stream.shards.clone(),
                    options: stream.options,
                },
            );
        }
        for ((stream, shard), (checkpoint, epoch)) in &state.checkpoints {
            self.checkpoints.insert(
                (*stream, *shard),
                StoredCheckpoint {
                    checkpoint: *checkpoint,
                    epoch: *epoch,
                },
            );
        }
    }

    fn persist(&self, entry: &MetaEntry) -> Result<()> {
        self.meta.append(entry).map_err(Error::from)
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Register a new stream over `shards`
    pub fn create_stream(&self, shards: Vec<ShardId>, options: StreamOptions) -> Result<StreamId> {
        let id = StreamId::new();
        let count = shards.len();
        let entry = MetaEntry::StreamCreated {
            stream: id,
            shards: shards.clone(),
            options,
        };
        self.streams.insert(id, StreamInfo { id, shards, options });
        if let Err(e) = self.persist(&entry) {
            self.streams.remove(&id);
            return Err(e);
        }
        info!(stream = %id, shards = count, "created stream");
        Ok(id)
    }

    /// Remove a stream and all of its checkpoints
    pub fn delete_stream(&self, stream: StreamId) -> Result<()> {
        let (_, removed) = self
            .streams
            .remove(&stream)
            .ok_or(Error::StreamNotFound(stream))?;
        if let Err(e) = self.persist(&MetaEntry::StreamDeleted { stream }) {
            self.streams.insert(stream, removed);
            return Err(e);
        }
        self.checkpoints.retain(|(s, _), _| *s != stream);
        self.poll_locks.retain(|(s, _), _| *s != stream);
        info!(stream = %stream, "deleted stream");
        Ok(())
    }

    /// Definition of `stream`
    pub fn get_stream(&self, stream: StreamId) -> Result<StreamInfo> {
        self.streams
            .get(&stream)
            .map(|s| s.clone())
            .ok_or(Error::StreamNotFound(stream))
    }

    /// Every stream, in no particular order
    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.streams.iter().map(|s| s.value().clone()).collect()
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Lock serializing polls and checkpoint writes for one (stream, shard)
    pub fn poll_lock(&self, stream: StreamId, shard: ShardId) -> Arc<Mutex<()>> {
        self.poll_locks
            .entry((stream, shard))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Stored checkpoint, if any
    pub fn get_checkpoint(&self, stream: StreamId, shard: ShardId) -> Option<StoredCheckpoint> {
        self.checkpoints.get(&(stream, shard)).map(|c| *c)
    }

    fn check_epoch(shard: ShardId, stored: Option<&StoredCheckpoint>, epoch: u64) -> Result<()> {
        match stored {
            Some(stored) if epoch < stored.epoch => Err(Error::StaleLeader {
                shard,
                stored: stored.epoch,
                attempted: epoch,
            }),
            _ => Ok(()),
        }
    }

    fn write(
        &self,
        stream: StreamId,
        shard: ShardId,
        previous: Option<StoredCheckpoint>,
        next: StoredCheckpoint,
    ) -> Result<()> {
        self.checkpoints.insert((stream, shard), next);
        let entry = MetaEntry::CheckpointSet {
            stream,
            shard,
            checkpoint: next.checkpoint,
            epoch: next.epoch,
        };
        if let Err(e) = self.persist(&entry) {
            match previous {
                Some(previous) => self.checkpoints.insert((stream, shard), previous),
                None => self.checkpoints.remove(&(stream, shard)).map(|(_, c)| c),
            };
            return Err(e);
        }
        debug!(
            stream = %stream,
            shard = %shard,
            checkpoint = %next.checkpoint,
            epoch = next.epoch,
            "persisted checkpoint"
        );
        Ok(())
    }

    /// Explicitly position a checkpoint
    ///
    /// Moving to an earlier position is a `CheckpointRegression`; setting
    /// the stored position again changes nothing. A forward move keeps the
    /// higher of the two safe times and drops any partial-transaction
    /// progress. Returns the checkpoint now stored.
    pub fn set_checkpoint(
        &self,
        stream: StreamId,
        shard: ShardId,
        requested: Checkpoint,
        epoch: u64,
    ) -> Result<Checkpoint> {
        if !self.streams.contains_key(&stream) {
            return Err(Error::StreamNotFound(stream));
        }
        let previous = self.get_checkpoint(stream, shard);
        Self::check_epoch(shard, previous.as_ref(), epoch)?;

        let next = match previous {
            Some(current) if requested.position < current.checkpoint.position => {
                return Err(Error::CheckpointRegression {
                    current: current.checkpoint,
                    requested,
                })
            }
            Some(current) if requested.position == current.checkpoint.position => {
                return Ok(current.checkpoint)
            }
            Some(current) => Checkpoint {
                position: requested.position,
                safe_time: requested.safe_time.max(current.checkpoint.safe_time),
                resume: None,
            },
            None => requested,
        };
        self.write(
            stream,
            shard,
            previous,
            StoredCheckpoint {
                checkpoint: next,
                epoch: epoch.max(previous.map_or(0, |p| p.epoch)),
            },
        )?;
        Ok(next)
    }

    /// Store a poll result if it is ahead of the stored checkpoint
    ///
    /// Returns whether anything was written.
    pub fn advance(
        &self,
        stream: StreamId,
        shard: ShardId,
        checkpoint: Checkpoint,
        epoch: u64,
    ) -> Result<bool> {
        if !self.streams.contains_key(&stream) {
            return Err(Error::StreamNotFound(stream));
        }
        let previous = self.get_checkpoint(stream, shard);
        Self::check_epoch(shard, previous.as_ref(), epoch)?;
        if let Some(current) = previous {
            if !current.checkpoint.is_behind(&checkpoint) && current.epoch == epoch {
                return Ok(false);
            }
            if !current.checkpoint.is_behind(&checkpoint) {
                // same progress under a newer leader: record the epoch only
                let next = StoredCheckpoint {
                    checkpoint: current.checkpoint,
                    epoch,
                };
                self.write(stream, shard, previous, next)?;
                return Ok(true);
            }
        }
        self.write(stream, shard, previous, StoredCheckpoint { checkpoint, epoch })?;
        Ok(true)
    }

    /// Drop a stream's checkpoint on one shard
    pub fn delete_checkpoint(&self, stream: StreamId, shard: ShardId) -> Result<()> {
        let removed = match self.checkpoints.remove(&(stream, shard)) {
            Some((_, removed)) => removed,
            None => return Ok(()),
        };
        if let Err(e) = self.persist(&MetaEntry::CheckpointDeleted { stream, shard }) {
            self.checkpoints.insert((stream, shard), removed);
            return Err(e);
        }
        self.poll_locks.remove(&(stream, shard));
        Ok(())
    }

    /// Entries reproducing the current state
    pub fn snapshot_into(&self, out: &mut Vec<MetaEntry>) {
        for stream in self.streams.iter() {
            out.push(MetaEntry::StreamCreated {
                stream: stream.id,
                shards: stream.shards.clone(),
                options: stream.options,
            });
        }
        for entry in self.checkpoints.iter() {
            let (stream, shard) = *entry.key();
            if !self.streams.contains_key(&stream) {
                continue;
            }
            out.push(MetaEntry::CheckpointSet {
                stream,
                shard,
                checkpoint: entry.checkpoint,
                epoch: entry.epoch,
            });
        }
    }
}

impl std::fmt::Debug for StreamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStore")
            .field("streams", &self.streams.len())
            .field("checkpoints", &self.checkpoints.len())
            .finish()
    }
}
