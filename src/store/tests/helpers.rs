use crate::log::{self, Replay};
use crate::{Store, StoreConfig};
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
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

/// Opens a store at `path` with default config.
pub fn open(path: &Path) -> Store {
    init_tracing();
    Store::open(path).unwrap()
}

/// Opens a store with an explicit config.
pub fn open_with(path: &Path, config: StoreConfig) -> Store {
    init_tracing();
    Store::open_with_config(path, config).unwrap()
}

/// Writes `key_{i:04}` → `val_{i:04}` for `i` in `0..n`.
pub fn fill(store: &mut Store, n: usize) {
    for i in 0..n {
        store.set(&key(i), &val(i)).unwrap();
    }
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key_{i:04}").into_bytes()
}

pub fn val(i: usize) -> Vec<u8> {
    format!("val_{i:04}").into_bytes()
}

/// Applies `ops` random set/delete operations over a small key space to
/// both `store` and a model map, returning the model.
pub fn random_ops(store: &mut Store, ops: usize) -> HashMap<Vec<u8>, Vec<u8>> {
    let mut rng = rand::rng();
    let mut model = HashMap::new();
    for _ in 0..ops {
        let k = key(rng.random_range(0..32));
        if rng.random_bool(0.3) {
            store.delete(&k).unwrap();
            model.remove(&k);
        } else {
            let len = rng.random_range(0..64);
            let v: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            store.set(&k, &v).unwrap();
            model.insert(k, v);
        }
    }
    model
}

/// Asserts the store holds exactly `model` over the random key space.
pub fn assert_matches_model(store: &Store, model: &HashMap<Vec<u8>, Vec<u8>>) {
    assert_eq!(store.len(), model.len());
    for i in 0..32 {
        let k = key(i);
        assert_eq!(
            store.get(&k),
            model.get(&k).map(Vec::as_slice),
            "key {}",
            String::from_utf8_lossy(&k)
        );
    }
}

/// Replays the log at `path` from scratch.
pub fn replay_file(path: &Path) -> Replay {
    log::replay(BufReader::new(File::open(path).unwrap())).unwrap()
}

/// Keys of the Set records in the log at `path`, in file order.
pub fn logged_set_keys(path: &Path) -> Vec<Vec<u8>> {
    log::LogReader::open(path)
        .unwrap()
        .map(|e| log::Record::decode(&e.unwrap().payload).unwrap())
        .map(|r| {
            assert!(!r.is_delete(), "unexpected tombstone in log");
            r.key().to_vec()
        })
        .collect()
}

/// Names of all files in `dir`, sorted.
pub fn dir_entries(dir: &Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}
