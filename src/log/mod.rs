//! Append-only data log.
//!
//! The log is the only persistent artifact of a store.  It is a plain
//! sequence of CRC-protected entries, appended one at a time and forced to
//! stable storage before the append returns.
//!
//! # On-disk layout
//!
//! ```text
//! [LEN_BE u32][CRC32_BE u32][PAYLOAD; LEN]
//! [LEN_BE u32][CRC32_BE u32][PAYLOAD; LEN]
//! ...
//! ```
//!
//! - **Header** — 8 bytes: payload length, then CRC32 (IEEE) of the payload.
//! - **Payload** — an encoded [`Record`].
//!
//! The length comes first so a reader knows exactly how many bytes to
//! consume before it can validate the checksum.  There is no file header,
//! magic, or version field; an empty file is an empty log.
//!
//! # Tail policy
//!
//! Replay stops silently at the first entry that is cut short or fails its
//! checksum, and reports why through [`TailState`].  Only the final entry
//! can be torn by a crash, since every append is synced before the next
//! one starts.  A payload that passes its checksum but does not decode is
//! a different matter: it surfaces as [`LogError::Corrupt`].
//!
//! # Guarantees
//!
//! - **Durability:** every [`LogWriter::append`] ends with [`File::sync_all`].
//! - **Atomic failure:** a failed append truncates the file back to where
//!   the entry started, so later entries never land behind a torn frame.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

mod record;
mod replay;

pub use record::{Record, TAG_DELETE, TAG_SET, encode_delete, encode_set};
pub use replay::{LogSummary, Replay, inspect, replay};

use std::{
    fs::{File, OpenOptions},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::encoding::{Encode, EncodingError, len_to_u32};

/// Size of an entry header: `u32` length + `u32` checksum.
pub const HEADER_SIZE: usize = 8;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A payload could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// An entry passed its checksum but its payload is malformed.
    #[error("malformed entry at offset {offset}: {source}")]
    Corrupt {
        /// Byte offset of the entry header.
        offset: u64,
        /// Why the payload was rejected.
        source: EncodingError,
    },
}

// ------------------------------------------------------------------------------------------------
// Framing
// ------------------------------------------------------------------------------------------------

/// CRC32 (IEEE) of a payload.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Prepends the `[len][crc]` header to `payload`.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, EncodingError> {
    let len = len_to_u32(payload.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    len.encode_to(&mut buf)?;
    checksum(payload).encode_to(&mut buf)?;
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Writes one framed entry to `writer` without syncing.
///
/// Returns the number of bytes written.  Used directly for bulk rewrites
/// that sync once at the end; regular appends go through [`LogWriter`].
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<u64, LogError> {
    let bytes = frame(payload)?;
    writer.write_all(&bytes)?;
    Ok(bytes.len() as u64)
}

// ------------------------------------------------------------------------------------------------
// LogWriter
// ------------------------------------------------------------------------------------------------

/// Exclusive append handle on a log file.
///
/// The file is opened in append mode, so every write lands at the current
/// end of file.  `offset` mirrors the file length.
#[derive(Debug)]
pub struct LogWriter {
    /// Open file handle, append mode.
    file: File,

    /// Path to the log file on disk.
    path: PathBuf,

    /// Current end of the log in bytes.
    offset: u64,
}

impl LogWriter {
    /// Opens an existing log (or creates it when `create` is set) for
    /// appending, positioned at end of file.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self, LogError> {
        let path = path.as_ref();
        let file = open_log_file(path, create)?;
        Self::from_file(file, path)
    }

    /// Wraps an already opened append-mode handle.
    pub fn from_file(file: File, path: impl AsRef<Path>) -> Result<Self, LogError> {
        let offset = file.metadata()?.len();
        let path = path.as_ref().to_path_buf();
        debug!(path = %path.display(), offset, "log opened for append");
        Ok(Self { file, path, offset })
    }

    /// Appends one entry and syncs it to stable storage.
    ///
    /// Returns the offset at which the entry starts.  On error the entry is
    /// not durable and the file is cut back to its previous length.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, LogError> {
        let bytes = frame(payload)?;
        let start = self.offset;

        if let Err(e) = self
            .file
            .write_all(&bytes)
            .and_then(|()| self.file.sync_all())
        {
            self.rollback(start);
            return Err(LogError::Io(e));
        }

        self.offset += bytes.len() as u64;
        trace!(offset = start, payload_len = payload.len(), "appended entry");
        Ok(start)
    }

    /// Forces all written data to stable storage.
    pub fn sync(&self) -> Result<(), LogError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Syncs and releases the file handle.
    pub fn close(self) -> Result<(), LogError> {
        self.sync()?;
        debug!(path = %self.path.display(), offset = self.offset, "log closed");
        Ok(())
    }

    /// Current end of the log in bytes.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path of the underlying log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rollback(&mut self, len: u64) {
        if let Err(e) = self.file.set_len(len).and_then(|()| self.file.sync_all()) {
            error!(
                path = %self.path.display(),
                len,
                "failed to roll back partial append: {e}"
            );
        }
    }
}

/// Opens a log file for reading and appending.
pub(crate) fn open_log_file(path: &Path, create: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(create)
        .open(path)
}

// ------------------------------------------------------------------------------------------------
// LogReader
// ------------------------------------------------------------------------------------------------

/// Why a [`LogReader`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    /// End of file exactly on an entry boundary.
    Clean,

    /// Fewer than [`HEADER_SIZE`] bytes remained.
    ShortHeader,

    /// The header declared more payload bytes than remained.
    ShortPayload,

    /// The payload did not match its checksum.
    ChecksumMismatch,
}

impl TailState {
    /// Returns `true` if the log ended on an entry boundary.
    pub fn is_clean(self) -> bool {
        self == TailState::Clean
    }
}

/// One checksum-verified entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Byte offset of the entry header.
    pub offset: u64,

    /// The raw payload.
    pub payload: Vec<u8>,
}

/// Streaming reader over log entries.
///
/// Yields entries in file order and ends at the first torn or corrupt
/// entry; see [`TailState`].  Only genuine I/O errors are yielded as
/// `Err`.  Reading starts wherever `inner` is positioned, normally offset 0.
pub struct LogReader<R> {
    /// Byte source.
    inner: R,

    /// End of the last valid entry.
    offset: u64,

    /// Set once the reader has stopped.
    tail: Option<TailState>,

    /// Set after an I/O error; the reader yields nothing further.
    failed: bool,
}

impl LogReader<BufReader<File>> {
    /// Opens `path` read-only and positions a reader at offset 0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> LogReader<R> {
    /// Wraps a byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            tail: None,
            failed: false,
        }
    }

    /// End of the last valid entry read so far.
    pub fn valid_len(&self) -> u64 {
        self.offset
    }

    /// Why reading stopped, or `None` if it has not stopped yet.
    pub fn tail(&self) -> Option<TailState> {
        self.tail
    }

    fn stop(&mut self, state: TailState) -> Option<Result<LogEntry, LogError>> {
        if !state.is_clean() {
            debug!(offset = self.offset, ?state, "log replay stopped at torn tail");
        }
        self.tail = Some(state);
        None
    }

    fn read_next(&mut self) -> Option<Result<LogEntry, LogError>> {
        let mut header = [0u8; HEADER_SIZE];
        let filled = match read_full(&mut self.inner, &mut header) {
            Ok(n) => n,
            Err(e) => return Some(Err(LogError::Io(e))),
        };
        if filled == 0 {
            return self.stop(TailState::Clean);
        }
        if filled < HEADER_SIZE {
            return self.stop(TailState::ShortHeader);
        }

        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);

        // `take` grows the buffer as bytes arrive, so a garbage length
        // never triggers a huge up-front allocation.
        let mut payload = Vec::new();
        if let Err(e) = self
            .inner
            .by_ref()
            .take(u64::from(len))
            .read_to_end(&mut payload)
        {
            return Some(Err(LogError::Io(e)));
        }
        if payload.len() < len as usize {
            return self.stop(TailState::ShortPayload);
        }

        if checksum(&payload) != expected {
            return self.stop(TailState::ChecksumMismatch);
        }

        let entry = LogEntry {
            offset: self.offset,
            payload,
        };
        self.offset += (HEADER_SIZE + len as usize) as u64;
        Some(Ok(entry))
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<LogEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.tail.is_some() || self.failed {
            return None;
        }
        let item = self.read_next();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

/// Reads until `buf` is full or the source is exhausted, returning the
/// number of bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
