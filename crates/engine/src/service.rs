//! Change-capture service
//!
//! [`CdcService`] is the consumer-facing entry point. It owns the stream
//! store, the split handoff state, and the historical mark tracker, all
//! persisted through one metadata log, and runs a background task that
//! reclaims drained split parents.
//!
//! ## Poll
//!
//! ```text
//! 1. Lock (stream, shard); load the stored checkpoint
//!    (or the split handoff checkpoint for an unpolled child)
//! 2. Refuse a drained split parent with ShardSplit
//! 3. Note the leader epoch, assemble a batch, re-check the epoch;
//!    restart on change, up to leader_retry_limit times
//! 4. Record any split marker in the handoff state
//! 5. Persist the new checkpoint under the epoch from step 3
//! ```
//!
//! # Example
//!
//! ```ignore
//! let service = CdcService::builder()
//!     .path("./cdc")
//!     .strict()
//!     .open(store.clone())?;
//!
//! let stream = service.create_stream(&[shard])?;
//! let batch = service.poll(stream, shard)?;
//! ```

use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use strata_core::traits::{
    CommitObserver, LeaderEpochs, ShardLogReader, ShardTopology, StorageEngine,
    TransactionResolver, TxnOutcome,
};
use strata_core::{
    ChangeRecord, Checkpoint, Error, LogEntry, LogPosition, LogicalTimestamp, Result, ShardId,
    StreamId, TxnId,
};
use strata_durability::{
    DurabilityMode, MetaEntry, MetaLog, MetaState, RecoveryOptions, RecoveryResult, SplitPhase,
    SplitRecord, StreamOptions,
};
use tracing::{debug, info, warn};

use crate::assembler::TransactionAssembler;
use crate::checkpoint_store::{StreamInfo, StreamStore};
use crate::config::CdcConfig;
use crate::high_water::HistoricalMaxTracker;
use crate::resolver::{ResolverAdapter, RetryPolicy};
use crate::safe_time::combined_safe_time;
use crate::split::SplitHandoff;

/// Result of a poll
#[derive(Debug, Clone)]
pub struct PollResponse {
    /// Records in emission order
    pub records: Vec<ChangeRecord>,
    /// Checkpoint to continue from (already persisted)
    pub checkpoint: Checkpoint,
    /// More records were eligible than the per-poll budget allowed
    pub truncated: bool,
    /// Safe time of the shard after this poll
    pub safe_time: LogicalTimestamp,
}

/// A shard a stream can poll, with the checkpoint it would start from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollableShard {
    /// Shard
    pub shard: ShardId,
    /// Stored checkpoint, or the handoff checkpoint of an unpolled child
    pub checkpoint: Checkpoint,
}

/// Storage engine seen through each collaborator trait
struct EngineHandle(Arc<dyn StorageEngine>);

impl ShardLogReader for EngineHandle {
    fn read_log(
        &self,
        shard: ShardId,
        from: LogPosition,
        max_entries: usize,
    ) -> Result<Vec<LogEntry>> {
        self.0.read_log(shard, from, max_entries)
    }
}

impl TransactionResolver for EngineHandle {
    fn resolve_transaction(&self, txn: TxnId) -> Result<TxnOutcome> {
        self.0.resolve_transaction(txn)
    }
}

impl ShardTopology for EngineHandle {
    fn shard_exists(&self, shard: ShardId) -> bool {
        self.0.shard_exists(shard)
    }

    fn list_shards(&self) -> Vec<ShardId> {
        self.0.list_shards()
    }

    fn list_child_shards(&self, parent: ShardId) -> Result<Vec<ShardId>> {
        self.0.list_child_shards(parent)
    }

    fn reclaim_shard(&self, shard: ShardId) -> Result<()> {
        self.0.reclaim_shard(shard)
    }
}

impl LeaderEpochs for EngineHandle {
    fn shard_leader_epoch(&self, shard: ShardId) -> Result<u64> {
        self.0.shard_leader_epoch(shard)
    }
}

struct ServiceInner {
    config: CdcConfig,
    engine: Arc<EngineHandle>,
    resolver: ResolverAdapter,
    meta: Arc<MetaLog>,
    streams: StreamStore,
    splits: SplitHandoff,
    historical: Arc<HistoricalMaxTracker>,
    recovery: RecoveryResult,
    compaction: Mutex<()>,
    compacted_len: AtomicU64,
}

impl ServiceInner {
    fn scan_limit(&self) -> usize {
        self.config.max_log_scan_entries
    }

    /// Checkpoint a poll of (stream, shard) starts from
    fn current_checkpoint(&self, stream: StreamId, shard: ShardId) -> Checkpoint {
        if let Some(stored) = self.streams.get_checkpoint(stream, shard) {
            return stored.checkpoint;
        }
        self.splits
            .parent_of(shard)
            .and_then(|parent| self.splits.get(parent))
            .map(|record| SplitHandoff::child_checkpoint(&record))
            .unwrap_or_else(Checkpoint::min)
    }

    /// Learn the split lineage below `root`
    fn discover_tree(&self, root: ShardId) -> Result<()> {
        let mut pending = vec![root];
        while let Some(shard) = pending.pop() {
            let discovered = self
                .splits
                .discover(self.engine.as_ref(), shard, self.scan_limit())?;
            if let Some(record) = discovered {
                pending.extend(record.children);
            }
        }
        Ok(())
    }

    fn covers(&self, info: &StreamInfo, shard: ShardId) -> Result<()> {
        if info.shards.contains(&shard) {
            return Ok(());
        }
        for root in &info.shards {
            if self.splits.descends_from(shard, *root) {
                return Ok(());
            }
        }
        for root in &info.shards {
            self.discover_tree(*root)?;
            if self.splits.descends_from(shard, *root) {
                return Ok(());
            }
        }
        if !self.engine.shard_exists(shard) {
            return Err(Error::ShardNotFound(shard));
        }
        Err(Error::InvalidArgument(format!(
            "stream {} does not cover shard {}",
            info.id, shard
        )))
    }

    /// Split record of `shard`, waiting briefly for its children to be listed
    fn split_record(&self, shard: ShardId) -> Result<Option<SplitRecord>> {
        let policy = RetryPolicy::from_config(&self.config);
        let mut attempt = 0;
        loop {
            let record = self.splits.discover(self.engine.as_ref(), shard, self.scan_limit())?;
            match record {
                Some(r) if r.phase == SplitPhase::Splitting && attempt < policy.max_retries => {
                    std::thread::sleep(policy.delay(attempt));
                    attempt += 1;
                }
                other => return Ok(other),
            }
        }
    }

    /// Refuse polls of a parent the stream has fully drained
    fn check_split(&self, shard: ShardId, from: &Checkpoint) -> Result<()> {
        let record = match self.split_record(shard)? {
            Some(record) => record,
            None => return Ok(()),
        };
        if !SplitHandoff::is_drained(self.engine.as_ref(), &record, from)? {
            return Ok(());
        }
        if record.children.is_empty() {
            return Err(Error::SplitInProgress(shard));
        }
        Err(Error::ShardSplit {
            parent: shard,
            children: record.children,
        })
    }

    fn poll_locked(
        &self,
        info: &StreamInfo,
        shard: ShardId,
        from: Checkpoint,
    ) -> Result<PollResponse> {
        let stream = info.id;
        self.check_split(shard, &from)?;

        let assembler = TransactionAssembler::new(
            self.engine.as_ref(),
            &self.resolver,
            self.config.max_stream_intent_records,
            self.config.max_log_scan_entries,
        );

        let mut restarts = 0;
        let (epoch, batch) = loop {
            let epoch = self.engine.shard_leader_epoch(shard)?;
            let batch = assembler.assemble(shard, &from, info.options.consistent_records)?;
            if self.engine.shard_leader_epoch(shard)? == epoch {
                break (epoch, batch);
            }
            restarts += 1;
            if restarts > self.config.leader_retry_limit {
                warn!(
                    stream = %stream,
                    shard = %shard,
                    restarts,
                    "leader kept changing during poll"
                );
                return Err(Error::LeaderNotReady(shard));
            }
            debug!(
                stream = %stream,
                shard = %shard,
                restarts,
                "leader changed during poll, restarting"
            );
        };

        if let Some(marker) = &batch.split {
            let children = self.engine.list_child_shards(shard)?;
            self.splits.observe_marker(shard, marker, children)?;
        }

        self.streams.advance(stream, shard, batch.checkpoint, epoch)?;
        self.maybe_compact();

        Ok(PollResponse {
            safe_time: batch.checkpoint.safe_time,
            records: batch.records,
            checkpoint: batch.checkpoint,
            truncated: batch.truncated,
        })
    }

    fn collect_pollable(
        &self,
        stream: StreamId,
        shard: ShardId,
        out: &mut Vec<PollableShard>,
    ) -> Result<()> {
        let checkpoint = self.current_checkpoint(stream, shard);
        match self.splits.discover(self.engine.as_ref(), shard, self.scan_limit())? {
            None => out.push(PollableShard { shard, checkpoint }),
            Some(record) => {
                if !SplitHandoff::is_drained(self.engine.as_ref(), &record, &checkpoint)? {
                    out.push(PollableShard { shard, checkpoint });
                }
                for child in &record.children {
                    self.collect_pollable(stream, *child, out)?;
                }
            }
        }
        Ok(())
    }

    /// One retention pass over draining split parents
    fn reclaim_drained_parents(&self) -> Result<usize> {
        let mut reclaimed = 0;
        for record in self.splits.draining() {
            let holders: Vec<StreamId> = self
                .streams
                .list_streams()
                .into_iter()
                .filter(|info| {
                    info.shards.iter().any(|root| {
                        *root == record.parent || self.splits.descends_from(record.parent, *root)
                    })
                })
                .map(|info| info.id)
                .collect();
            let mut waiting = 0;
            for stream in &holders {
                let checkpoint = self.current_checkpoint(*stream, record.parent);
                if !SplitHandoff::is_drained(self.engine.as_ref(), &record, &checkpoint)? {
                    waiting += 1;
                }
            }
            if waiting > 0 {
                debug!(parent = %record.parent, waiting, "split parent still draining");
                continue;
            }

            let handoff = SplitHandoff::child_checkpoint(&record);
            for stream in &holders {
                for child in &record.children {
                    let epoch = match self.engine.shard_leader_epoch(*child) {
                        Ok(epoch) => epoch,
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    };
                    let lock = self.streams.poll_lock(*stream, *child);
                    let _guard = lock.lock();
                    if self.streams.get_checkpoint(*stream, *child).is_none() {
                        self.streams.advance(*stream, *child, handoff, epoch)?;
                    }
                }
            }

            match self.engine.reclaim_shard(record.parent) {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(parent = %record.parent, error = %e, "split parent not reclaimable yet");
                    continue;
                }
            }
            for stream in &holders {
                let lock = self.streams.poll_lock(*stream, record.parent);
                let _guard = lock.lock();
                self.streams.delete_checkpoint(*stream, record.parent)?;
            }
            self.splits.mark_deleted(record.parent)?;
            info!(
                parent = %record.parent,
                streams = holders.len(),
                children = record.children.len(),
                "reclaimed drained split parent"
            );
            reclaimed += 1;
        }
        if reclaimed > 0 {
            self.maybe_compact();
        }
        Ok(reclaimed)
    }

    fn snapshot(&self) -> Vec<MetaEntry> {
        let mut entries = Vec::new();
        self.streams.snapshot_into(&mut entries);
        self.historical.snapshot_into(&mut entries);
        self.splits.snapshot_into(&mut entries);
        entries
    }

    fn compact(&self) -> Result<usize> {
        let _guard = self.compaction.lock();
        let written = self.meta.rewrite_with(|| self.snapshot())?;
        self.compacted_len.store(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    /// Compact once the log has grown `compaction_threshold` entries past
    /// its last compacted size
    fn maybe_compact(&self) {
        let grown = self
            .meta
            .entries_since_compaction()
            .saturating_sub(self.compacted_len.load(Ordering::Relaxed));
        if grown < self.config.compaction_threshold {
            return;
        }
        let _guard = match self.compaction.try_lock() {
            Some(guard) => guard,
            None => return,
        };
        match self.meta.rewrite_with(|| self.snapshot()) {
            Ok(written) => self.compacted_len.store(written as u64, Ordering::Relaxed),
            Err(e) => warn!(error = %e, "metadata log compaction failed"),
        }
    }
}

/// Background task retrying split-parent reclamation
struct RetentionTask {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

impl RetentionTask {
    fn spawn(inner: Weak<ServiceInner>, interval: Duration) -> Result<Self> {
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("cdc-split-retention".into())
            .spawn(move || {
                let (lock, cvar) = &*signal;
                loop {
                    {
                        let mut stopped = lock.lock();
                        if !*stopped {
                            cvar.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    let inner = match inner.upgrade() {
                        Some(inner) => inner,
                        None => break,
                    };
                    if let Err(e) = inner.reclaim_drained_parents() {
                        warn!(error = %e, "split retention pass failed, retrying");
                    }
                }
            })?;
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        {
            let (lock, cvar) = &*self.shutdown;
            *lock.lock() = true;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("split retention task panicked");
            }
        }
    }
}

/// Transactionally consistent change-capture service
pub struct CdcService {
    inner: Arc<ServiceInner>,
    retention: Option<RetentionTask>,
}

impl CdcService {
    /// Open a service persisting its metadata under `path`
    pub fn open(path: impl AsRef<Path>, engine: Arc<dyn StorageEngine>) -> Result<Self> {
        CdcServiceBuilder::new().path(path).open(engine)
    }

    /// Service with no metadata on disk
    pub fn ephemeral(engine: Arc<dyn StorageEngine>) -> Result<Self> {
        CdcServiceBuilder::new().open(engine)
    }

    /// Builder for service configuration
    pub fn builder() -> CdcServiceBuilder {
        CdcServiceBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &CdcConfig {
        &self.inner.config
    }

    /// What was recovered from the metadata log on open
    pub fn recovery(&self) -> &RecoveryResult {
        &self.inner.recovery
    }

    /// Metadata log path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.inner.meta.path()
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Create a stream over `shards` with the configured options
    pub fn create_stream(&self, shards: &[ShardId]) -> Result<StreamId> {
        self.create_stream_with(
            shards,
            StreamOptions {
                consistent_records: self.inner.config.consistent_records,
            },
        )
    }

    /// Create a stream over `shards`
    pub fn create_stream_with(
        &self,
        shards: &[ShardId],
        options: StreamOptions,
    ) -> Result<StreamId> {
        if shards.is_empty() {
            return Err(Error::InvalidArgument("a stream needs at least one shard".into()));
        }
        let mut unique: Vec<ShardId> = Vec::with_capacity(shards.len());
        for shard in shards {
            if !self.inner.engine.shard_exists(*shard) {
                return Err(Error::ShardNotFound(*shard));
            }
            if !unique.contains(shard) {
                unique.push(*shard);
            }
        }
        let id = self.inner.streams.create_stream(unique, options)?;
        self.inner.maybe_compact();
        Ok(id)
    }

    /// Delete a stream and all of its checkpoints
    pub fn delete_stream(&self, stream: StreamId) -> Result<()> {
        self.inner.streams.delete_stream(stream)?;
        self.inner.maybe_compact();
        Ok(())
    }

    /// Definition of a stream
    pub fn get_stream(&self, stream: StreamId) -> Result<StreamInfo> {
        self.inner.streams.get_stream(stream)
    }

    /// Every stream
    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.inner.streams.list_streams()
    }

    // ========================================================================
    // Checkpoints
    // ========================================================================

    /// Position a stream's checkpoint on a shard
    ///
    /// Fails with `CheckpointRegression` for a position behind the stored
    /// one. Returns the checkpoint now stored.
    pub fn set_checkpoint(
        &self,
        stream: StreamId,
        shard: ShardId,
        position: LogPosition,
    ) -> Result<Checkpoint> {
        let info = self.inner.streams.get_stream(stream)?;
        self.inner.covers(&info, shard)?;
        let epoch = self.inner.engine.shard_leader_epoch(shard)?;
        let lock = self.inner.streams.poll_lock(stream, shard);
        let _guard = lock.lock();
        let stored = self
            .inner
            .streams
            .set_checkpoint(stream, shard, Checkpoint::from_position(position), epoch)?;
        self.inner.maybe_compact();
        Ok(stored)
    }

    /// Checkpoint the next poll of (stream, shard) starts from
    pub fn get_checkpoint(&self, stream: StreamId, shard: ShardId) -> Result<Checkpoint> {
        let info = self.inner.streams.get_stream(stream)?;
        self.inner.covers(&info, shard)?;
        Ok(self.inner.current_checkpoint(stream, shard))
    }

    /// Least safe time across every shard the stream still has to poll
    ///
    /// Records at or below it can be merged across shards by commit time.
    /// A shard that was never polled holds it at `LogicalTimestamp::MIN`.
    pub fn stream_safe_time(&self, stream: StreamId) -> Result<LogicalTimestamp> {
        let info = self.inner.streams.get_stream(stream)?;
        let mut pollable = Vec::new();
        for root in &info.shards {
            self.inner.collect_pollable(stream, *root, &mut pollable)?;
        }
        Ok(combined_safe_time(pollable.iter().map(|p| p.checkpoint.safe_time)))
    }

    // ========================================================================
    // Polling
    // ========================================================================

    /// Poll the next batch of records from the stored checkpoint
    pub fn poll(&self, stream: StreamId, shard: ShardId) -> Result<PollResponse> {
        let info = self.inner.streams.get_stream(stream)?;
        self.inner.covers(&info, shard)?;
        let lock = self.inner.streams.poll_lock(stream, shard);
        let _guard = lock.lock();
        let from = self.inner.current_checkpoint(stream, shard);
        self.inner.poll_locked(&info, shard, from)
    }

    /// Poll from a caller-supplied checkpoint
    ///
    /// Re-reads whatever follows `checkpoint`; the stored checkpoint only
    /// moves if the result is ahead of it.
    pub fn poll_from(
        &self,
        stream: StreamId,
        shard: ShardId,
        checkpoint: Checkpoint,
    ) -> Result<PollResponse> {
        let info = self.inner.streams.get_stream(stream)?;
        self.inner.covers(&info, shard)?;
        let lock = self.inner.streams.poll_lock(stream, shard);
        let _guard = lock.lock();
        self.inner.poll_locked(&info, shard, checkpoint)
    }

    /// Shards to poll in place of `shard`, with their starting checkpoints
    ///
    /// For a shard that never split this is the shard itself. After a split
    /// it is the parent while it still has data for the stream, followed by
    /// the children (recursively).
    pub fn list_pollable_shards(
        &self,
        stream: StreamId,
        shard: ShardId,
    ) -> Result<Vec<PollableShard>> {
        let info = self.inner.streams.get_stream(stream)?;
        self.inner.covers(&info, shard)?;
        let mut out = Vec::new();
        self.inner.collect_pollable(stream, shard, &mut out)?;
        Ok(out)
    }

    // ========================================================================
    // Shard metadata
    // ========================================================================

    /// Historical high-water mark of `shard`
    pub fn historical_max(&self, shard: ShardId) -> LogPosition {
        self.inner.historical.get(shard)
    }

    /// Split-handoff state of a split parent
    pub fn split_state(&self, parent: ShardId) -> Option<SplitRecord> {
        self.inner.splits.get(parent)
    }

    /// Run one split-retention pass now
    ///
    /// Returns the number of parents reclaimed.
    pub fn run_split_retention(&self) -> Result<usize> {
        self.inner.reclaim_drained_parents()
    }

    /// Rewrite the metadata log from current state
    pub fn compact(&self) -> Result<usize> {
        self.inner.compact()
    }

    /// Fsync the metadata log
    pub fn flush(&self) -> Result<()> {
        self.inner.meta.sync().map_err(Error::from)
    }
}

impl Drop for CdcService {
    fn drop(&mut self) {
        if let Some(mut task) = self.retention.take() {
            task.stop();
        }
        if let Err(e) = self.inner.meta.sync() {
            warn!(error = %e, "metadata log sync on shutdown failed");
        }
    }
}

impl std::fmt::Debug for CdcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdcService")
            .field("config", &self.inner.config)
            .field("meta", &self.inner.meta)
            .field("streams", &self.inner.streams)
            .finish()
    }
}

/// Builder for [`CdcService`]
///
/// ```ignore
/// // Durable metadata, fsync on every checkpoint
/// let service = CdcService::builder().path("./cdc").strict().open(engine)?;
///
/// // Tests: nothing on disk
/// let service = CdcService::builder().max_stream_intent_records(10).open(engine)?;
/// ```
#[derive(Debug, Clone)]
pub struct CdcServiceBuilder {
    config: CdcConfig,
    path: Option<PathBuf>,
    recovery: RecoveryOptions,
    retention: bool,
}

impl CdcServiceBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            config: CdcConfig::default(),
            path: None,
            recovery: RecoveryOptions::default(),
            retention: true,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CdcConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory for the metadata log
    ///
    /// Without a path nothing is persisted.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Keep metadata in memory only
    pub fn no_durability(mut self) -> Self {
        self.config.durability = DurabilityMode::None;
        self
    }

    /// Batch fsyncs (default: 100ms or 1000 entries)
    pub fn buffered(mut self) -> Self {
        self.config.durability = DurabilityMode::buffered_default();
        self
    }

    /// Batch fsyncs with custom limits
    pub fn buffered_with(mut self, interval_ms: u64, batch_size: usize) -> Self {
        self.config.durability = DurabilityMode::Batched {
            interval_ms,
            batch_size,
        };
        self
    }

    /// Fsync every metadata entry
    pub fn strict(mut self) -> Self {
        self.config.durability = DurabilityMode::Strict;
        self
    }

    /// Row records per poll
    pub fn max_stream_intent_records(mut self, n: usize) -> Self {
        self.config.max_stream_intent_records = n;
        self
    }

    /// Log entries read per poll
    pub fn max_log_scan_entries(mut self, n: usize) -> Self {
        self.config.max_log_scan_entries = n;
        self
    }

    /// Default emission mode of new streams
    pub fn consistent_records(mut self, consistent: bool) -> Self {
        self.config.consistent_records = consistent;
        self
    }

    /// Poll restarts on leader change before `LeaderNotReady`
    pub fn leader_retry_limit(mut self, n: u32) -> Self {
        self.config.leader_retry_limit = n;
        self
    }

    /// Interval of the split retention task
    pub fn parent_deletion_retry(mut self, interval: Duration) -> Self {
        self.config.parent_deletion_retry_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Metadata entries that trigger compaction
    pub fn compaction_threshold(mut self, n: u64) -> Self {
        self.config.compaction_threshold = n;
        self
    }

    /// Tolerance for corrupt metadata entries on open
    pub fn recovery_options(mut self, options: RecoveryOptions) -> Self {
        self.recovery = options;
        self
    }

    /// Run split retention only through [`CdcService::run_split_retention`]
    pub fn manual_split_retention(mut self) -> Self {
        self.retention = false;
        self
    }

    /// Recover metadata and start the service over `engine`
    pub fn open(self, engine: Arc<dyn StorageEngine>) -> Result<CdcService> {
        let started = Instant::now();
        self.config.validate()?;

        let (meta, state, recovery) = match &self.path {
            Some(path) => MetaLog::open(path, self.config.durability, self.recovery)?,
            None => (MetaLog::in_memory(), MetaState::default(), RecoveryResult::default()),
        };
        if recovery.entries_replayed > 0 || recovery.has_issues() {
            info!(summary = %recovery.summary(), "recovered change-capture metadata");
        }
        let meta = Arc::new(meta);

        let engine = Arc::new(EngineHandle(engine));
        let resolver_engine: Arc<dyn TransactionResolver> = engine.clone();
        let resolver =
            ResolverAdapter::new(resolver_engine, RetryPolicy::from_config(&self.config));

        let streams = StreamStore::new(meta.clone());
        streams.restore(&state);
        let splits = SplitHandoff::new(meta.clone());
        splits.restore(&state);
        let historical = Arc::new(HistoricalMaxTracker::new(meta.clone()));
        historical.restore(&state);

        let tracker = Arc::downgrade(&historical);
        let observer: Weak<dyn CommitObserver> = tracker;
        engine.0.register_commit_observer(observer);
        historical.catch_up(engine.as_ref(), self.config.max_log_scan_entries)?;

        let inner = Arc::new(ServiceInner {
            config: self.config,
            engine,
            resolver,
            meta,
            streams,
            splits,
            historical,
            recovery,
            compaction: Mutex::new(()),
            compacted_len: AtomicU64::new(0),
        });

        let retention = if self.retention {
            Some(RetentionTask::spawn(
                Arc::downgrade(&inner),
                inner.config.parent_deletion_interval(),
            )?)
        } else {
            None
        };

        info!(
            durability = inner.config.durability.description(),
            streams = inner.streams.list_streams().len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "change-capture service started"
        );
        Ok(CdcService { inner, retention })
    }
}

impl Default for CdcServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
