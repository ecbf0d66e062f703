//! Intent buffer and transaction assembler
//!
//! Turns a window of a shard's log into change records.
//!
//! ## Consistent mode
//!
//! ```text
//! 1. Scan entries after checkpoint.position (bounded window)
//! 2. Buffer provisional writes per transaction in the intent table;
//!    an Apply closes the transaction into a commit unit, an Abort
//!    discards it. DDL and autocommit writes are commit units on their own.
//! 3. Resolve transactions still open at the end of the window and feed
//!    them to the safe-time barrier
//! 4. Emit units with  previous_safe < commit_time <= safe_time
//!    in (commit_time, position) order, BEGIN/rows/COMMIT each
//! 5. Advance position to just before the earliest entry still needed:
//!    the first write of an open transaction or an unemitted unit
//! ```
//!
//! A unit whose writes precede the window (its Apply was held back by an
//! earlier poll) re-reads them from its `first_write` position.
//!
//! A full window that emits nothing because a committed transaction's Apply
//! lies past it is extended one chunk at a time, dropping entries already
//! emitted. A pending transaction stalls the poll after a single window.
//!
//! Row records are budgeted per poll. A unit that does not fit ends the
//! batch; if it is the first unit with rows, it is split across polls and
//! the checkpoint carries a [`TxnResume`].
//!
//! ## Eager mode
//!
//! Entries are surfaced in log order as they are scanned: BEGIN with a
//! transaction's first write on the shard, rows as written, COMMIT at the
//! Apply. Writes of transactions whose Abort is in the same window are
//! dropped; anything emitted before the abort was seen stays emitted.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use strata_core::traits::{ShardLogReader, TxnOutcome};
use strata_core::{
    ChangeRecord, Checkpoint, LogEntry, LogPayload, LogPosition, LogicalTimestamp, Result,
    RowChange, SchemaChange, ShardId, TxnId, TxnResume,
};
use tracing::debug;

use crate::resolver::ResolverAdapter;
use crate::safe_time::SafeTimeBarrier;

/// What holds the position of a consistent batch in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// No open transaction in the window
    Clear,
    /// Earliest open write belongs to an undecided transaction
    Pending,
    /// Earliest open write belongs to a committed transaction whose
    /// Apply is not in the window
    Committed,
}

/// Split marker found in a scanned window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitMarker {
    /// Position of the marker in the parent's log
    pub position: LogPosition,
    /// Timestamp of the marker
    pub timestamp: LogicalTimestamp,
    /// Children named by the marker
    pub children: Vec<ShardId>,
}

/// Result of assembling one window
#[derive(Debug, Clone)]
pub struct AssembledBatch {
    /// Records in emission order
    pub records: Vec<ChangeRecord>,
    /// Checkpoint to resume from
    pub checkpoint: Checkpoint,
    /// Row budget ran out before everything eligible was emitted
    pub truncated: bool,
    /// Unresolved transactions held back every record of the window
    pub stalled: bool,
    /// Entries scanned
    pub scanned: usize,
    /// Split marker seen in the window
    pub split: Option<SplitMarker>,
}

/// Entries a consistent poll still needs, and where its scan ended
#[derive(Debug)]
struct ScanWindow {
    entries: Vec<LogEntry>,
    /// Position and timestamp of the last entry read, kept or not
    end: Option<(LogPosition, LogicalTimestamp)>,
    scanned: usize,
}

impl ScanWindow {
    fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            end: entries.last().map(|e| (e.position, e.timestamp)),
            scanned: entries.len(),
            entries,
        }
    }

    /// Append the next chunk of the log
    ///
    /// Drops everything that can no longer produce a record: units
    /// committed at or below `safe_time` (already emitted), the writes of
    /// transactions they close, aborted transactions, and leader no-ops.
    fn extend(&mut self, chunk: Vec<LogEntry>, safe_time: LogicalTimestamp) {
        if let Some(last) = chunk.last() {
            self.end = Some((last.position, last.timestamp));
        }
        self.scanned += chunk.len();
        self.entries.extend(chunk);

        let closed: FxHashSet<TxnId> = self
            .entries
            .iter()
            .filter_map(|e| match &e.payload {
                LogPayload::Apply {
                    txn, commit_time, ..
                } if *commit_time <= safe_time => Some(*txn),
                LogPayload::Abort { txn } => Some(*txn),
                _ => None,
            })
            .collect();
        self.entries.retain(|e| match &e.payload {
            LogPayload::Ddl(_) | LogPayload::SingleShardWrite { .. } => e.timestamp > safe_time,
            LogPayload::Write { txn, .. }
            | LogPayload::Apply { txn, .. }
            | LogPayload::Abort { txn } => !closed.contains(txn),
            LogPayload::Split { .. } => true,
            LogPayload::LeaderNoOp { .. } => false,
        });
    }
}

/// Write buffered in the intent table
#[derive(Debug, Clone)]
struct BufferedWrite {
    position: LogPosition,
    row: RowChange,
}

/// Intent-table state of one transaction within a window
#[derive(Debug)]
struct TxnIntents {
    first_write: LogPosition,
    first_write_time: LogicalTimestamp,
    writes: Vec<BufferedWrite>,
}

#[derive(Debug)]
enum UnitBody {
    Ddl(SchemaChange),
    Autocommit(RowChange),
    Txn {
        txn: TxnId,
        first_write: LogPosition,
        /// `None` when some writes precede the window
        writes: Option<Vec<BufferedWrite>>,
    },
}

/// Something that becomes visible atomically at `commit_time`
#[derive(Debug)]
struct CommitUnit {
    commit_time: LogicalTimestamp,
    /// Entry that made the unit visible (DDL, autocommit write, or Apply)
    position: LogPosition,
    body: UnitBody,
}

impl CommitUnit {
    fn resumes(&self, resume: Option<&TxnResume>) -> Option<usize> {
        match (&self.body, resume) {
            (UnitBody::Txn { txn, .. }, Some(r))
                if *txn == r.txn && self.commit_time == r.commit_time =>
            {
                Some(r.emitted as usize)
            }
            _ => None,
        }
    }
}

/// Assembles change records for one shard
pub struct TransactionAssembler<'a> {
    reader: &'a dyn ShardLogReader,
    resolver: &'a ResolverAdapter,
    max_records: usize,
    max_scan: usize,
}

impl<'a> TransactionAssembler<'a> {
    /// Assembler over `reader`, budgeted to `max_records` rows and
    /// `max_scan` entries per call
    pub fn new(
        reader: &'a dyn ShardLogReader,
        resolver: &'a ResolverAdapter,
        max_records: usize,
        max_scan: usize,
    ) -> Self {
        Self {
            reader,
            resolver,
            max_records: max_records.max(1),
            max_scan: max_scan.max(1),
        }
    }

    /// Assemble the next batch after `checkpoint`
    pub fn assemble(
        &self,
        shard: ShardId,
        checkpoint: &Checkpoint,
        consistent: bool,
    ) -> Result<AssembledBatch> {
        if !consistent {
            let window = self
                .reader
                .read_log(shard, checkpoint.position, self.max_scan)?;
            return Ok(self.assemble_eager(shard, checkpoint, &window));
        }

        // A full window that yields nothing because a committed transaction's
        // Apply lies beyond it is extended chunk by chunk until the batch
        // moves, keeping only entries that can still produce records. A
        // pending transaction holds the barrier below its first write, so
        // reading further could not emit more.
        let first = self
            .reader
            .read_log(shard, checkpoint.position, self.max_scan)?;
        let mut full = first.len() >= self.max_scan;
        let mut window = ScanWindow::new(first);
        loop {
            let (batch, hold) = self.assemble_consistent(shard, checkpoint, &window)?;
            let moved =
                !batch.records.is_empty() || batch.checkpoint.position != checkpoint.position;
            if !full || moved || hold != Hold::Committed {
                return Ok(batch);
            }
            let from = window.end.map_or(checkpoint.position, |(p, _)| p);
            let chunk = self.reader.read_log(shard, from, self.max_scan)?;
            full = chunk.len() >= self.max_scan;
            window.extend(chunk, checkpoint.safe_time);
            debug!(
                shard = %shard,
                retained = window.entries.len(),
                scanned = window.scanned,
                "extending scan past committed transaction"
            );
        }
    }

    fn assemble_consistent(
        &self,
        shard: ShardId,
        old: &Checkpoint,
        window: &ScanWindow,
    ) -> Result<(AssembledBatch, Hold)> {
        let mut intents: FxHashMap<TxnId, TxnIntents> = FxHashMap::default();
        let mut units: Vec<CommitUnit> = Vec::new();
        let mut split = None;

        for entry in &window.entries {
            match &entry.payload {
                LogPayload::Ddl(change) => units.push(CommitUnit {
                    commit_time: entry.timestamp,
                    position: entry.position,
                    body: UnitBody::Ddl(change.clone()),
                }),
                LogPayload::SingleShardWrite { row } => units.push(CommitUnit {
                    commit_time: entry.timestamp,
                    position: entry.position,
                    body: UnitBody::Autocommit(row.clone()),
                }),
                LogPayload::Write { txn, row, .. } => {
                    intents
                        .entry(*txn)
                        .or_insert_with(|| TxnIntents {
                            first_write: entry.position,
                            first_write_time: entry.timestamp,
                            writes: Vec::new(),
                        })
                        .writes
                        .push(BufferedWrite {
                            position: entry.position,
                            row: row.clone(),
                        });
                }
                LogPayload::Apply {
                    txn,
                    commit_time,
                    first_write,
                } => {
                    let buffered = intents.remove(txn);
                    let writes = match buffered {
                        Some(b) if b.first_write == *first_write => Some(b.writes),
                        _ => None,
                    };
                    units.push(CommitUnit {
                        commit_time: *commit_time,
                        position: entry.position,
                        body: UnitBody::Txn {
                            txn: *txn,
                            first_write: *first_write,
                            writes,
                        },
                    });
                }
                LogPayload::Abort { txn } => {
                    intents.remove(txn);
                }
                LogPayload::Split { children } => {
                    split = Some(SplitMarker {
                        position: entry.position,
                        timestamp: entry.timestamp,
                        children: children.to_vec(),
                    });
                }
                LogPayload::LeaderNoOp { .. } => {}
            }
        }

        // Transactions still open at the end of the window hold the barrier.
        let mut barrier = SafeTimeBarrier::new(old.safe_time);
        if let Some((_, horizon)) = window.end {
            barrier.observe_horizon(horizon);
        }
        let mut open: Vec<(TxnId, TxnIntents)> = intents.into_iter().collect();
        open.sort_by_key(|(_, i)| i.first_write);
        let mut session = self.resolver.session();
        let mut first_open_write: Option<LogPosition> = None;
        let mut hold = Hold::Clear;
        for (txn, intent) in &open {
            let held = match session.resolve(*txn)? {
                TxnOutcome::Pending => {
                    barrier.constrain_pending(intent.first_write_time);
                    Hold::Pending
                }
                TxnOutcome::Committed(commit_time) => {
                    barrier.constrain_committed(commit_time);
                    Hold::Committed
                }
                TxnOutcome::Aborted => continue,
            };
            // sorted by first write, so the first survivor is the earliest
            if first_open_write.is_none() {
                first_open_write = Some(intent.first_write);
                hold = held;
            }
        }
        let barrier_time = barrier.safe_time();

        units.sort_by_key(|u| (u.commit_time, u.position));

        let resume_in = old.resume.as_ref();
        let mut records = Vec::new();
        let mut rows_emitted = 0usize;
        let mut last_commit = old.safe_time;
        let mut resume_out = None;
        let mut truncated = false;
        let mut emitted_upto = 0usize;

        for (i, unit) in units.iter().enumerate() {
            let resume_from = unit.resumes(resume_in);
            if unit.commit_time <= old.safe_time && resume_from.is_none() {
                emitted_upto = i + 1;
                continue;
            }
            if unit.commit_time > barrier_time {
                break;
            }

            let start = resume_from.unwrap_or(0);
            let rows = self.unit_rows(shard, unit)?;
            let start = start.min(rows.len());
            let remaining = rows.len() - start;
            let budget = self.max_records.saturating_sub(rows_emitted);

            if remaining <= budget {
                Self::emit(&mut records, shard, unit, &rows, start, rows.len());
                rows_emitted += remaining;
                last_commit = unit.commit_time;
                emitted_upto = i + 1;
                continue;
            }

            truncated = true;
            if rows_emitted == 0 {
                if let UnitBody::Txn { txn, .. } = &unit.body {
                    let end = start + budget;
                    Self::emit(&mut records, shard, unit, &rows, start, end);
                    resume_out = Some(TxnResume {
                        txn: *txn,
                        commit_time: unit.commit_time,
                        emitted: end as u32,
                    });
                }
            }
            break;
        }

        let safe_time = match (&resume_out, truncated) {
            (Some(resume), _) => resume.commit_time.prev().max(old.safe_time),
            (None, true) => last_commit,
            (None, false) => barrier_time,
        };

        // Position: just before the earliest entry a later poll still needs.
        let scan_end = window.end.map_or(old.position, |(p, _)| p);
        let mut position = scan_end;
        if let Some(p) = first_open_write {
            position = position.min(p.before());
        }
        if let Some(p) = units[emitted_upto..]
            .iter()
            .filter(|u| u.commit_time > safe_time || u.resumes(resume_out.as_ref()).is_some())
            .map(|u| u.position)
            .min()
        {
            position = position.min(p.before());
        }
        let position = position.max(old.position);

        if truncated {
            debug!(
                shard = %shard,
                rows = rows_emitted,
                position = %position,
                "poll truncated at row budget"
            );
        }
        let stalled = barrier.constrained() > 0 && records.is_empty();
        if stalled {
            debug!(
                shard = %shard,
                open = barrier.constrained(),
                safe_time = %safe_time,
                "safe time stalled on unresolved transactions"
            );
        }

        let batch = AssembledBatch {
            records,
            checkpoint: Checkpoint {
                position,
                safe_time,
                resume: resume_out,
            },
            truncated,
            stalled,
            scanned: window.scanned,
            split,
        };
        Ok((batch, hold))
    }

    /// Rows of a unit in log order
    fn unit_rows(&self, shard: ShardId, unit: &CommitUnit) -> Result<Vec<BufferedWrite>> {
        match &unit.body {
            UnitBody::Ddl(_) => Ok(Vec::new()),
            UnitBody::Autocommit(row) => Ok(vec![BufferedWrite {
                position: unit.position,
                row: row.clone(),
            }]),
            UnitBody::Txn {
                writes: Some(writes),
                ..
            } => Ok(writes.clone()),
            UnitBody::Txn {
                txn,
                first_write,
                writes: None,
            } => self.reread_writes(shard, *txn, *first_write, unit.position),
        }
    }

    /// Collect `txn`'s writes from `first_write` up to its apply entry
    fn reread_writes(
        &self,
        shard: ShardId,
        txn: TxnId,
        first_write: LogPosition,
        apply: LogPosition,
    ) -> Result<Vec<BufferedWrite>> {
        let mut writes = Vec::new();
        let mut cursor = first_write.before();
        loop {
            let chunk = self.reader.read_log(shard, cursor, self.max_scan)?;
            let last = match chunk.last() {
                Some(e) => e.position,
                None => break,
            };
            for entry in chunk.iter().take_while(|e| e.position < apply) {
                if let LogPayload::Write { txn: t, row, .. } = &entry.payload {
                    if *t == txn {
                        writes.push(BufferedWrite {
                            position: entry.position,
                            row: row.clone(),
                        });
                    }
                }
            }
            if last >= apply {
                break;
            }
            cursor = last;
        }
        Ok(writes)
    }

    /// Emit `rows[start..end]` of a unit with its brackets
    ///
    /// BEGIN only when starting at the first row, COMMIT only when
    /// reaching the last.
    fn emit(
        out: &mut Vec<ChangeRecord>,
        shard: ShardId,
        unit: &CommitUnit,
        rows: &[BufferedWrite],
        start: usize,
        end: usize,
    ) {
        let ts = unit.commit_time;
        let (txn, begin_at) = match &unit.body {
            UnitBody::Ddl(change) => {
                out.push(ChangeRecord::ddl(shard, unit.position, ts, change.clone()));
                return;
            }
            UnitBody::Autocommit(_) => (None, unit.position),
            UnitBody::Txn {
                txn, first_write, ..
            } => (Some(*txn), *first_write),
        };

        if start == 0 {
            out.push(ChangeRecord::begin(shard, begin_at, ts, txn));
        }
        for write in &rows[start..end] {
            out.push(ChangeRecord::row(
                shard,
                write.position,
                ts,
                txn,
                write.row.clone(),
            ));
        }
        if end == rows.len() {
            out.push(ChangeRecord::commit(shard, unit.position, ts, txn));
        }
    }

    fn assemble_eager(
        &self,
        shard: ShardId,
        old: &Checkpoint,
        window: &[LogEntry],
    ) -> AssembledBatch {
        let aborted: FxHashSet<TxnId> = window
            .iter()
            .filter_map(|e| match e.payload {
                LogPayload::Abort { txn } => Some(txn),
                _ => None,
            })
            .collect();

        let mut records = Vec::new();
        let mut rows_emitted = 0usize;
        let mut position = old.position;
        let mut safe_time = old.safe_time;
        let mut truncated = false;
        let mut split = None;
        let mut scanned = 0usize;

        for entry in window {
            let rows: SmallVec<[&RowChange; 1]> = match &entry.payload {
                LogPayload::SingleShardWrite { row } => smallvec::smallvec![row],
                LogPayload::Write { txn, row, .. } if !aborted.contains(txn) => {
                    smallvec::smallvec![row]
                }
                _ => SmallVec::new(),
            };
            if !rows.is_empty() && rows_emitted >= self.max_records {
                truncated = true;
                break;
            }
            scanned += 1;

            let ts = entry.timestamp;
            match &entry.payload {
                LogPayload::Ddl(change) => {
                    records.push(ChangeRecord::ddl(shard, entry.position, ts, change.clone()))
                }
                LogPayload::SingleShardWrite { row } => {
                    records.push(ChangeRecord::begin(shard, entry.position, ts, None));
                    records.push(ChangeRecord::row(shard, entry.position, ts, None, row.clone()));
                    records.push(ChangeRecord::commit(shard, entry.position, ts, None));
                }
                LogPayload::Write { txn, seq, row } if !aborted.contains(txn) => {
                    if *seq == 0 {
                        records.push(ChangeRecord::begin(shard, entry.position, ts, Some(*txn)));
                    }
                    records.push(ChangeRecord::row(
                        shard,
                        entry.position,
                        ts,
                        Some(*txn),
                        row.clone(),
                    ));
                }
                LogPayload::Apply {
                    txn, commit_time, ..
                } => records.push(ChangeRecord::commit(
                    shard,
                    entry.position,
                    *commit_time,
                    Some(*txn),
                )),
                LogPayload::Split { children } => {
                    split = Some(SplitMarker {
                        position: entry.position,
                        timestamp: entry.timestamp,
                        children: children.to_vec(),
                    });
                }
                LogPayload::Write { .. }
                | LogPayload::Abort { .. }
                | LogPayload::LeaderNoOp { .. } => {}
            }
            rows_emitted += rows.len();
            position = entry.position;
            safe_time = safe_time.max(ts);
        }

        AssembledBatch {
            records,
            checkpoint: Checkpoint {
                position,
                safe_time,
                resume: None,
            },
            truncated,
            stalled: false,
            scanned,
            split,
        }
    }
}
