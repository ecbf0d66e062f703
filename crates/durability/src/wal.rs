//! Metadata log file operations
//!
//! [`MetaLog`] appends framed [`MetaEntry`] records to `cdc_meta.wal` and
//! fsyncs according to its [`DurabilityMode`]. Opening a log recovers it
//! first and cuts off any torn tail so new frames never follow garbage.
//!
//! ## Compaction
//!
//! ```text
//! 1. Acquire the file lock (appends block)
//! 2. Snapshot current state into entries
//! 3. Write entries to cdc_meta.wal.tmp, fsync
//! 4. Rename over cdc_meta.wal (atomic replace)
//! 5. Reopen for append, release lock
//! ```
//!
//! Writers update their in-memory state before appending, so a snapshot
//! taken under the lock already contains every entry appended before it.

use crate::encoding::encode_frame;
use crate::entry::MetaEntry;
use crate::error::MetaLogError;
use crate::mode::DurabilityMode;
use crate::recovery::{MetaRecovery, MetaState, RecoveryOptions, RecoveryResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// File name of the metadata log inside a data directory
pub const META_LOG_FILENAME: &str = "cdc_meta.wal";

struct LogFile {
    file: File,
    unsynced: usize,
    last_sync: Instant,
}

impl LogFile {
    fn open_append(path: &Path) -> Result<Self, MetaLogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            unsynced: 0,
            last_sync: Instant::now(),
        })
    }

    fn sync(&mut self) -> Result<(), MetaLogError> {
        self.file.sync_data()?;
        self.unsynced = 0;
        self.last_sync = Instant::now();
        Ok(())
    }
}

/// Append-only metadata log
pub struct MetaLog {
    path: Option<PathBuf>,
    mode: DurabilityMode,
    file: Mutex<Option<LogFile>>,
    appended: AtomicU64,
}

impl MetaLog {
    /// Log that keeps nothing on disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            mode: DurabilityMode::None,
            file: Mutex::new(None),
            appended: AtomicU64::new(0),
        }
    }

    /// Recover and open the log in `dir`
    ///
    /// With `DurabilityMode::None` nothing is read or written and the
    /// recovered state is empty.
    pub fn open(
        dir: &Path,
        mode: DurabilityMode,
        options: RecoveryOptions,
    ) -> Result<(Self, MetaState, RecoveryResult), MetaLogError> {
        if !mode.requires_wal() {
            return Ok((Self::in_memory(), MetaState::default(), RecoveryResult::default()));
        }

        std::fs::create_dir_all(dir)?;
        let path = dir.join(META_LOG_FILENAME);
        let (state, result) = MetaRecovery::recover(&path, options)?;

        if path.exists() && std::fs::metadata(&path)?.len() > result.valid_len {
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(result.valid_len)?;
            file.sync_all()?;
            debug!(valid_len = result.valid_len, "Truncated metadata log to valid prefix");
        }

        let log = Self {
            file: Mutex::new(Some(LogFile::open_append(&path)?)),
            path: Some(path),
            mode,
            appended: AtomicU64::new(result.entries_replayed),
        };
        Ok((log, state, result))
    }

    /// Log file path, if file-backed
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Durability mode
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Entries in the log file since it was last rewritten
    pub fn entries_since_compaction(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Append one entry, fsyncing per the durability mode
    pub fn append(&self, entry: &MetaEntry) -> Result<(), MetaLogError> {
        let mut guard = self.file.lock();
        let log = match guard.as_mut() {
            Some(log) => log,
            None => return Ok(()),
        };

        let frame = encode_frame(entry)?;
        log.file.write_all(&frame)?;
        log.unsynced += 1;
        self.appended.fetch_add(1, Ordering::Relaxed);

        match self.mode {
            DurabilityMode::None => {}
            DurabilityMode::Strict => log.sync()?,
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                if log.unsynced >= batch_size
                    || log.last_sync.elapsed() >= Duration::from_millis(interval_ms)
                {
                    log.sync()?;
                }
            }
        }
        Ok(())
    }

    /// Force an fsync of everything appended so far
    pub fn sync(&self) -> Result<(), MetaLogError> {
        match self.file.lock().as_mut() {
            Some(log) if log.unsynced > 0 => log.sync(),
            _ => Ok(()),
        }
    }

    /// Replace the log with the entries produced by `snapshot`
    ///
    /// `snapshot` runs with appends blocked. Returns the number of entries
    /// written.
    pub fn rewrite_with<F>(&self, snapshot: F) -> Result<usize, MetaLogError>
    where
        F: FnOnce() -> Vec<MetaEntry>,
    {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(0),
        };

        let mut guard = self.file.lock();
        let entries = snapshot();
        let tmp = path.with_extension("wal.tmp");
        {
            let mut file = File::create(&tmp)?;
            for entry in &entries {
                file.write_all(&encode_frame(entry)?)?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        *guard = Some(LogFile::open_append(path)?);
        self.appended.store(entries.len() as u64, Ordering::Relaxed);

        info!(entries = entries.len(), path = %path.display(), "Compacted metadata log");
        Ok(entries.len())
    }
}

impl Drop for MetaLog {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!(error = %e, "Final metadata log sync failed");
        }
    }
}

impl std::fmt::Debug for MetaLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaLog")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("appended", &self.entries_since_compaction())
            .finish()
    }
}
