//! # logkv
//!
//! A single-node, log-structured key-value store: an in-memory table backed
//! by an **append-only log** on disk, rebuilt by full replay on startup.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logkv::Store;
//!
//! let mut store = Store::open("/tmp/t.log").unwrap();
//!
//! store.set(b"a", b"1").unwrap();
//! store.set(b"b", b"2").unwrap();
//! store.delete(b"a").unwrap();
//! assert_eq!(store.get(b"a"), None);
//! assert_eq!(store.get(b"b"), Some(&b"2"[..]));
//!
//! // Rewrite the log down to the live keys.
//! store.compact().unwrap();
//! store.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Durable appends** — every mutation is synced to the log before it is
//!   applied in memory.
//! - **Crash-tail tolerance** — a torn final entry is dropped on replay.
//! - **CRC32 integrity** — every entry carries a checksum of its payload.
//! - **Atomic compaction** — the log is rewritten to a staging file and
//!   renamed over the live log, with directory syncs around the swap.
//!
//! ## Concurrency
//!
//! A [`Store`] is single-writer and single-threaded: mutations take
//! `&mut self` and run to completion on the caller's thread.  Callers that
//! need shared access must wrap the store in their own lock.

pub mod encoding;
pub mod log;
pub mod store;

use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::log::LogError;

pub use store::{CompactionStage, CompactionStats, Store, StoreStats};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Store`].
///
/// All fields have sensible defaults via [`StoreConfig::default()`].
/// The configuration is validated when passed to [`Store::open_with_config`].
///
/// # Example
///
/// ```rust
/// use logkv::{AutoCompact, StoreConfig};
///
/// let config = StoreConfig {
///     auto_compact: Some(AutoCompact {
///         min_log_entries: 1_000,
///         stale_ratio: 0.5,
///     }),
///     ..StoreConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Create the log file if it does not exist.
    ///
    /// Default: `true`.
    pub create_if_missing: bool,

    /// Write keys in ascending byte order during compaction, so the
    /// compacted log is byte-for-byte reproducible.
    ///
    /// Default: `true`.
    pub sorted_compaction: bool,

    /// Cut off bytes after the last valid entry when opening.
    ///
    /// New entries appended behind a torn tail would be invisible to the
    /// next replay, so this is on by default.
    ///
    /// Default: `true`.
    pub truncate_torn_tail: bool,

    /// Compact automatically after a mutation once the log is mostly stale.
    ///
    /// Default: `None` (manual compaction only).
    pub auto_compact: Option<AutoCompact>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sorted_compaction: true,
            truncate_torn_tail: true,
            auto_compact: None,
        }
    }
}

impl StoreConfig {
    /// Validates all configuration parameters.
    fn validate(&self) -> Result<(), StoreError> {
        if let Some(auto) = &self.auto_compact {
            if auto.min_log_entries == 0 {
                return Err(StoreError::InvalidConfig(
                    "auto_compact.min_log_entries must be >= 1".into(),
                ));
            }
            if !(auto.stale_ratio > 0.0 && auto.stale_ratio <= 1.0) {
                return Err(StoreError::InvalidConfig(
                    "auto_compact.stale_ratio must be in (0.0, 1.0]".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Automatic compaction trigger.
///
/// After each successful `set` or `delete`, the store compacts when the log
/// holds at least `min_log_entries` entries and the fraction of entries that
/// no longer contribute a live key is at least `stale_ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoCompact {
    /// Minimum number of entries in the log before compaction is considered.
    pub min_log_entries: u64,

    /// Stale entries divided by total entries. Must be in (0.0, 1.0].
    pub stale_ratio: f64,
}

impl AutoCompact {
    /// Returns `true` if a log with the given counts should be compacted.
    pub(crate) fn should_compact(&self, log_entries: u64, live_keys: u64) -> bool {
        if log_entries < self.min_log_entries || log_entries == 0 {
            return false;
        }
        let stale = log_entries.saturating_sub(live_keys);
        stale as f64 / log_entries as f64 >= self.stale_ratio
    }
}

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Store`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening, reading, writing, syncing, renaming, or removing a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key or value could not be represented in the log format.
    #[error("malformed entry: {0}")]
    MalformedEntry(#[from] EncodingError),

    /// Replay found an entry that passed its checksum but does not decode.
    #[error("corrupt log at offset {offset}: {source}")]
    CorruptLog {
        /// Byte offset of the bad entry.
        offset: u64,
        /// Why the payload was rejected.
        source: EncodingError,
    },

    /// Compaction failed before the swap; the original log is untouched.
    #[error("compaction failed at {stage}: {source}")]
    Compaction {
        /// Step that failed.
        stage: CompactionStage,
        /// Underlying failure.
        source: io::Error,
    },

    /// Compaction failed after the swap; the store has no writable log.
    #[error("compaction failed fatally at {stage}, store no longer writable: {source}")]
    CompactionFatal {
        /// Step that failed.
        stage: CompactionStage,
        /// Underlying failure.
        source: io::Error,
    },

    /// A mutation was attempted after a fatal compaction failure.
    #[error("store is degraded and cannot accept writes")]
    Degraded,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Invalid configuration parameter.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<LogError> for StoreError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::Io(e) => StoreError::Io(e),
            LogError::Encoding(e) => StoreError::MalformedEntry(e),
            LogError::Corrupt { offset, source } => StoreError::CorruptLog { offset, source },
        }
    }
}
