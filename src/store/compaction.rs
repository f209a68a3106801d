//! Log compaction.
//!
//! Rewrites the live log so it holds exactly one Set entry per live key and
//! no tombstones, then atomically swaps the rewrite in.
//!
//! ## Steps
//!
//! ```text
//! 1. Snapshot    create <log>.compact.tmp (must not exist)
//! 2. Rewrite     write one Set per live key, flush, sync
//! 3. Stage       rename .compact.tmp -> .compact.new
//! 4. StageSync   fsync the directory
//! 5. Swap        close the live handle, rename .compact.new -> <log>
//! 6. SwapSync    fsync the directory
//! 7. Reopen      open <log> for appends
//! ```
//!
//! A failure in steps 1–5 removes the artifact, keeps the original log, and
//! leaves the store writable ([`StoreError::Compaction`]).  A failure in
//! steps 6–7 happens after the compacted log is already in place; the
//! store is left without a writable handle ([`StoreError::CompactionFatal`]).
//!
//! Both artifacts sit next to the live log.  Neither is ever the live log,
//! so a crash before step 5 leaves the original intact and
//! [`remove_stale_artifacts`] cleans up on the next open.

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::{LogState, Store};
use crate::StoreError;
use crate::log::{self, LogError, LogWriter};

/// Suffix of the file being written in steps 1–2.
pub(crate) const TMP_SUFFIX: &str = ".compact.tmp";

/// Suffix of the finished rewrite waiting to be swapped in.
pub(crate) const STAGED_SUFFIX: &str = ".compact.new";

/// Steps of a compaction, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStage {
    /// Creating the temporary file.
    Snapshot,
    /// Writing live keys into the temporary file.
    Rewrite,
    /// Renaming the temporary file to its staging name.
    Stage,
    /// Syncing the directory after staging.
    StageSync,
    /// Closing the live handle and renaming the staged file over it.
    Swap,
    /// Syncing the directory after the swap.
    SwapSync,
    /// Reopening the compacted log for appends.
    Reopen,
}

impl fmt::Display for CompactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompactionStage::Snapshot => "snapshot",
            CompactionStage::Rewrite => "rewrite",
            CompactionStage::Stage => "stage",
            CompactionStage::StageSync => "stage sync",
            CompactionStage::Swap => "swap",
            CompactionStage::SwapSync => "swap sync",
            CompactionStage::Reopen => "reopen",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful [`Store::compact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Log entries before compaction.
    pub entries_before: u64,
    /// Log entries after compaction (one per live key).
    pub entries_after: u64,
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
}

impl Store {
    /// Rewrites the log down to the live keys and swaps it in.
    ///
    /// Must not run concurrently with other mutations; `&mut self` enforces
    /// this within one process.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Closed`] / [`StoreError::Degraded`] if there is no
    ///   writable log.
    /// - [`StoreError::Compaction`] on a failure before the swap.  The
    ///   original log and the table are untouched.
    /// - [`StoreError::CompactionFatal`] on a failure after the swap.  The
    ///   compacted log on disk is correct, but the store refuses further
    ///   writes until reopened.
    pub fn compact(&mut self) -> Result<CompactionStats, StoreError> {
        let bytes_before = self.writer()?.offset();
        let entries_before = self.log_entries;

        let tmp_path = artifact_path(&self.path, TMP_SUFFIX);
        let staged_path = artifact_path(&self.path, STAGED_SUFFIX);
        let dir = parent_dir(&self.path);

        // 1. Snapshot. An existing file is not ours to remove.
        let tmp = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|source| StoreError::Compaction {
                stage: CompactionStage::Snapshot,
                source,
            })?;
        self.inject(CompactionStage::Snapshot)
            .map_err(|source| abort(CompactionStage::Snapshot, source, &tmp_path))?;

        // 2. Rewrite.
        let bytes_after = self
            .write_snapshot(tmp)
            .and_then(|n| self.inject(CompactionStage::Rewrite).map(|()| n))
            .map_err(|source| abort(CompactionStage::Rewrite, source, &tmp_path))?;

        // 3. Stage.
        self.inject(CompactionStage::Stage)
            .and_then(|()| fs::rename(&tmp_path, &staged_path))
            .map_err(|source| abort(CompactionStage::Stage, source, &tmp_path))?;

        // 4. Durability barrier for the staging rename.
        fsync_dir(&dir)
            .and_then(|()| self.inject(CompactionStage::StageSync))
            .map_err(|source| abort(CompactionStage::StageSync, source, &staged_path))?;

        // 5. Swap.
        self.swap(&staged_path)?;

        // 6. Durability barrier for the swap. From here on the compacted log
        //    is live and the old handle is gone.
        if let Err(source) = fsync_dir(&dir).and_then(|()| self.inject(CompactionStage::SwapSync)) {
            return Err(self.degrade(CompactionStage::SwapSync, source));
        }

        // 7. Reopen.
        let writer = match self
            .inject(CompactionStage::Reopen)
            .map_err(LogError::Io)
            .and_then(|()| LogWriter::open(&self.path, false))
        {
            Ok(writer) => writer,
            Err(e) => return Err(self.degrade(CompactionStage::Reopen, into_io(e))),
        };
        if writer.offset() != bytes_after {
            warn!(
                path = %self.path.display(),
                written = bytes_after,
                on_disk = writer.offset(),
                "compacted log size differs from bytes written"
            );
        }

        let entries_after = self.table.len() as u64;
        self.log_bytes = writer.offset();
        self.log_entries = entries_after;
        self.state = LogState::Active(writer);

        info!(
            path = %self.path.display(),
            entries_before,
            entries_after,
            bytes_before,
            bytes_after,
            "log compacted"
        );

        Ok(CompactionStats {
            entries_before,
            entries_after,
            bytes_before,
            bytes_after,
        })
    }

    /// Writes one Set entry per live key into `file`, then flushes, syncs
    /// and closes it.  Returns the bytes written.
    fn write_snapshot(&self, file: File) -> io::Result<u64> {
        let mut keys: Vec<&Vec<u8>> = self.table.keys().collect();
        if self.config.sorted_compaction {
            keys.sort_unstable();
        }

        let mut out = BufWriter::new(file);
        let mut written = 0u64;
        for key in keys {
            let value = &self.table[key];
            let payload = log::encode_set(key, value)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            written += log::write_frame(&mut out, &payload).map_err(into_io)?;
        }

        // `into_inner` reports a failed final flush, and the sync reports
        // anything the kernel could not persist. Dropping the handle after
        // that cannot lose data.
        let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
        file.sync_all()?;
        Ok(written)
    }

    /// Step 5: release the live handle and rename the staged file over the
    /// live log.  On failure the staged file is removed and the original
    /// log is reopened.
    fn swap(&mut self, staged_path: &Path) -> Result<(), StoreError> {
        let LogState::Active(writer) = std::mem::replace(&mut self.state, LogState::Closed) else {
            // `compact` checked for an active writer on entry.
            remove_artifact(staged_path);
            return Err(StoreError::Closed);
        };

        let result = writer
            .close()
            .map_err(into_io)
            .and_then(|()| self.inject(CompactionStage::Swap))
            .and_then(|()| fs::rename(staged_path, &self.path));

        if let Err(source) = result {
            remove_artifact(staged_path);
            return match LogWriter::open(&self.path, false) {
                Ok(writer) => {
                    self.state = LogState::Active(writer);
                    Err(StoreError::Compaction {
                        stage: CompactionStage::Swap,
                        source,
                    })
                }
                // The original log is intact, but there is nothing to write to.
                Err(e) => {
                    error!("failed to reopen log after aborted swap: {e}");
                    Err(self.degrade(CompactionStage::Swap, source))
                }
            };
        }
        Ok(())
    }

    /// Marks the store as having no writable log and builds the fatal error.
    fn degrade(&mut self, stage: CompactionStage, source: io::Error) -> StoreError {
        error!(
            path = %self.path.display(),
            %stage,
            "compaction failed after swap, store is read-only: {source}"
        );
        self.state = LogState::Degraded;
        StoreError::CompactionFatal { stage, source }
    }

    #[cfg(test)]
    fn inject(&self, stage: CompactionStage) -> io::Result<()> {
        if self.fail_at == Some(stage) {
            return Err(io::Error::other(format!("injected failure at {stage}")));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline(always)]
    fn inject(&self, _stage: CompactionStage) -> io::Result<()> {
        Ok(())
    }
}

/// Removes compaction artifacts left next to the log at `path`.
///
/// Both artifacts predate the swap, so the live log is authoritative.
pub(crate) fn remove_stale_artifacts(path: &Path) -> io::Result<()> {
    for suffix in [TMP_SUFFIX, STAGED_SUFFIX] {
        let artifact = artifact_path(path, suffix);
        match fs::remove_file(&artifact) {
            Ok(()) => warn!(
                artifact = %artifact.display(),
                "removed stale compaction artifact"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// `<path><suffix>`, e.g. `db.log.compact.tmp`.
pub(crate) fn artifact_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Cleans up `artifact` and wraps a pre-swap failure.
fn abort(stage: CompactionStage, source: io::Error, artifact: &Path) -> StoreError {
    remove_artifact(artifact);
    warn!(%stage, "compaction aborted, original log kept: {source}");
    StoreError::Compaction { stage, source }
}

fn remove_artifact(artifact: &Path) {
    match fs::remove_file(artifact) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            artifact = %artifact.display(),
            "failed to remove compaction artifact: {e}"
        ),
    }
}

fn into_io(e: LogError) -> io::Error {
    match e {
        LogError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
