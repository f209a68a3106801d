//! # Key-value store
//!
//! [`Store`] owns the in-memory table and the only writable handle on the
//! log.  It is the sole mutator of both.
//!
//! ## Write path
//!
//! `set` / `delete` encode a payload, append it to the log (synced), and
//! only then touch the table.  A failed append leaves the table unchanged.
//!
//! ## Open path
//!
//! 1. Remove artifacts left behind by a compaction that crashed before its
//!    swap.
//! 2. Open or create the log, replay it from offset 0 into a fresh table.
//! 3. Cut off a torn tail if configured, then keep the handle positioned at
//!    end of file for appends.
//!
//! The table is derived state.  It is never persisted on its own and can
//! always be rebuilt by replaying the log.

mod compaction;

#[cfg(test)]
mod tests;

pub use compaction::{CompactionStage, CompactionStats};

use std::collections::HashMap;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use crate::log::{self, LogWriter};
use crate::{StoreConfig, StoreError};

/// Snapshot of store statistics returned by [`Store::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Keys currently in the table.
    pub live_keys: u64,

    /// Entries in the log, including superseded values and tombstones.
    pub log_entries: u64,

    /// Size of the log in bytes.
    pub log_bytes: u64,

    /// Log entries that no longer contribute a live key.
    pub stale_entries: u64,
}

/// Ownership state of the log handle.
#[derive(Debug)]
enum LogState {
    /// Normal operation.
    Active(LogWriter),

    /// A compaction failed after its swap; no writable handle exists.
    Degraded,

    /// [`Store::close`] has run.
    Closed,
}

/// A log-backed key-value store.
///
/// Not internally synchronized: mutating methods take `&mut self`.
#[derive(Debug)]
pub struct Store {
    /// Path of the live log.
    path: PathBuf,

    /// Configuration, validated on open.
    config: StoreConfig,

    /// Append handle, or why there is none.
    state: LogState,

    /// Current key → value state.
    table: HashMap<Vec<u8>, Vec<u8>>,

    /// Entries currently in the log.
    log_entries: u64,

    /// Size of the log in bytes as of the last append, open, or compaction.
    log_bytes: u64,

    /// Compaction step at which to inject a failure.
    #[cfg(test)]
    pub(crate) fail_at: Option<CompactionStage>,
}

impl Store {
    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) a store backed by the log at `path`, using
    /// [`StoreConfig::default()`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens a store with an explicit configuration.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidConfig`] if `config` fails validation.
    /// - [`StoreError::Io`] if the log cannot be opened, read, or trimmed.
    /// - [`StoreError::CorruptLog`] if replay hits a checksum-valid entry
    ///   that does not decode.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let path = path.as_ref().to_path_buf();

        // 1. Leftovers from a compaction that never reached its swap.
        compaction::remove_stale_artifacts(&path)?;

        // 2. Open and replay.
        let mut file = log::open_log_file(&path, config.create_if_missing)?;
        file.seek(SeekFrom::Start(0))?;
        let replay = log::replay(BufReader::new(&mut file))?;

        // 3. Trim a torn tail so new entries follow the last valid one.
        let file_len = file.metadata()?.len();
        let valid_len = replay.summary.valid_len;
        if valid_len < file_len {
            if config.truncate_torn_tail {
                warn!(
                    path = %path.display(),
                    valid_len,
                    discarded = file_len - valid_len,
                    tail = ?replay.summary.tail,
                    "discarding torn log tail"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            } else {
                warn!(
                    path = %path.display(),
                    valid_len,
                    file_len,
                    "log has a torn tail; appending after it"
                );
            }
        }

        let writer = LogWriter::from_file(file, &path)?;
        let log_bytes = writer.offset();

        info!(
            path = %path.display(),
            live_keys = replay.table.len(),
            log_entries = replay.summary.entries,
            log_bytes,
            "store opened"
        );

        Ok(Self {
            path,
            config,
            state: LogState::Active(writer),
            table: replay.table,
            log_entries: replay.summary.entries,
            log_bytes,
            #[cfg(test)]
            fail_at: None,
        })
    }

    /// Releases the log handle and discards the table.
    ///
    /// The log is synced before the handle is dropped.  Calling `close`
    /// more than once is harmless; later calls return `Ok(())`.
    pub fn close(&mut self) -> Result<(), StoreError> {
        let state = std::mem::replace(&mut self.state, LogState::Closed);
        self.table = HashMap::new();

        match state {
            LogState::Active(writer) => {
                writer.close()?;
                info!(path = %self.path.display(), "store closed");
            }
            LogState::Degraded => {
                info!(path = %self.path.display(), "degraded store closed");
            }
            LogState::Closed => {}
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Read operations
    // --------------------------------------------------------------------------------------------

    /// Looks up `key` in the table.  Never touches the disk.
    ///
    /// Returns `None` for absent keys and after [`Store::close`].
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.table.get(key).map(Vec::as_slice)
    }

    /// Returns `true` if `key` is live.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.table.contains_key(key)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if there are no live keys.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Path of the live log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current counters.
    pub fn stats(&self) -> StoreStats {
        let live_keys = self.table.len() as u64;
        StoreStats {
            live_keys,
            log_entries: self.log_entries,
            log_bytes: self.log_bytes,
            stale_entries: self.log_entries.saturating_sub(live_keys),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Write operations
    // --------------------------------------------------------------------------------------------

    /// Inserts or overwrites `key`.
    ///
    /// The entry is durable when this returns `Ok`.  On error the table is
    /// unchanged.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let payload = log::encode_set(key, value)?;
        self.append(&payload)?;
        self.table.insert(key.to_vec(), value.to_vec());
        trace!(key_len = key.len(), value_len = value.len(), "set");
        self.maybe_auto_compact()
    }

    /// Removes `key`.
    ///
    /// A tombstone is appended even when `key` is absent.  On error the
    /// table is unchanged.
    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        let payload = log::encode_delete(key)?;
        self.append(&payload)?;
        let existed = self.table.remove(key).is_some();
        trace!(key_len = key.len(), existed, "delete");
        self.maybe_auto_compact()
    }

    // --------------------------------------------------------------------------------------------
    // Internal helpers
    // --------------------------------------------------------------------------------------------

    /// Returns the append handle, or why there is none.
    fn writer(&mut self) -> Result<&mut LogWriter, StoreError> {
        match &mut self.state {
            LogState::Active(writer) => Ok(writer),
            LogState::Degraded => Err(StoreError::Degraded),
            LogState::Closed => Err(StoreError::Closed),
        }
    }

    fn append(&mut self, payload: &[u8]) -> Result<(), StoreError> {
        let offset = {
            let writer = self.writer()?;
            writer.append(payload)?;
            writer.offset()
        };
        self.log_bytes = offset;
        self.log_entries += 1;
        Ok(())
    }

    /// Runs compaction if the configured trigger fires.
    ///
    /// The mutation that got us here is already durable, so a recoverable
    /// compaction failure is only logged.  A fatal one is returned.
    fn maybe_auto_compact(&mut self) -> Result<(), StoreError> {
        let Some(policy) = self.config.auto_compact else {
            return Ok(());
        };
        if !policy.should_compact(self.log_entries, self.table.len() as u64) {
            return Ok(());
        }

        debug!(
            log_entries = self.log_entries,
            live_keys = self.table.len(),
            "auto-compaction triggered"
        );
        match self.compact() {
            Ok(_) => Ok(()),
            Err(e @ StoreError::CompactionFatal { .. }) => Err(e),
            Err(e) => {
                warn!("auto-compaction failed, log left as is: {e}");
                Ok(())
            }
        }
    }
}
