use crate::log::{LogEntry, LogReader, LogWriter, TailState, encode_delete, encode_set};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Set payload for `key_{i:04}` → `val_{i:04}`.
pub fn set_payload(i: usize) -> Vec<u8> {
    encode_set(
        format!("key_{i:04}").as_bytes(),
        format!("val_{i:04}").as_bytes(),
    )
    .unwrap()
}

/// Delete payload for `key_{i:04}`.
pub fn delete_payload(i: usize) -> Vec<u8> {
    encode_delete(format!("key_{i:04}").as_bytes()).unwrap()
}

/// Appends every payload through a fresh writer and returns the start
/// offset of each entry.
pub fn write_payloads(path: &Path, payloads: &[Vec<u8>]) -> Vec<u64> {
    let mut writer = LogWriter::open(path, true).unwrap();
    let offsets = payloads
        .iter()
        .map(|p| writer.append(p).unwrap())
        .collect();
    writer.close().unwrap();
    offsets
}

/// Reads all entries and returns them with the tail state and valid length.
pub fn read_all(path: &Path) -> (Vec<LogEntry>, TailState, u64) {
    let mut reader = LogReader::open(path).unwrap();
    let entries: Vec<LogEntry> = reader.by_ref().map(Result::unwrap).collect();
    let tail = reader.tail().unwrap();
    (entries, tail, reader.valid_len())
}

/// Appends raw bytes to the end of the file, bypassing framing.
pub fn append_raw(path: &Path, bytes: &[u8]) {
    let mut f = OpenOptions::new().append(true).open(path).unwrap();
    f.write_all(bytes).unwrap();
    f.sync_all().unwrap();
}

/// Truncate the file to the given size.
pub fn truncate_file(path: &Path, size: u64) {
    let f = OpenOptions::new().write(true).open(path).unwrap();
    f.set_len(size).unwrap();
    f.sync_all().unwrap();
}

/// XOR one byte of the file in place.
pub fn flip_byte(path: &Path, offset: u64, mask: u8) {
    let mut bytes = fs::read(path).unwrap();
    bytes[offset as usize] ^= mask;
    fs::write(path, bytes).unwrap();
}

pub fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}
