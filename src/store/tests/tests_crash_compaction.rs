//! Failure-during-compaction tests.
//!
//! Each test forces a failure at one [`CompactionStage`] through the
//! store's `fail_at` hook, or plants the files a crash would leave behind.
//!
//! 1. **Before the swap** (`Snapshot` … `Swap`) — the original log is
//!    byte-for-byte untouched, artifacts are removed, and the store stays
//!    writable.
//! 2. **After the swap** (`SwapSync`, `Reopen`) — the compacted log is in
//!    place, the store is degraded, and a reopen recovers full state.
//!
//! ## See also
//! - [`tests_compaction`] — the happy path

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::log::inspect;
    use crate::store::compaction::{STAGED_SUFFIX, TMP_SUFFIX, artifact_path};
    use crate::store::tests::helpers::*;
    use crate::store::{CompactionStage, LogState, Store};
    use crate::StoreError;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const PRE_SWAP: [CompactionStage; 5] = [
        CompactionStage::Snapshot,
        CompactionStage::Rewrite,
        CompactionStage::Stage,
        CompactionStage::StageSync,
        CompactionStage::Swap,
    ];

    const POST_SWAP: [CompactionStage; 2] = [CompactionStage::SwapSync, CompactionStage::Reopen];

    /// Store with 20 keys written, 10 of them overwritten and 5 deleted.
    fn churned_store(path: &Path) -> Store {
        let mut store = open(path);
        fill(&mut store, 20);
        for i in 0..10 {
            store.set(&key(i), b"second").unwrap();
        }
        for i in 15..20 {
            store.delete(&key(i)).unwrap();
        }
        store
    }

    fn assert_churned_state(store: &Store) {
        assert_eq!(store.len(), 15);
        for i in 0..10 {
            assert_eq!(store.get(&key(i)), Some(&b"second"[..]));
        }
        for i in 10..15 {
            assert_eq!(store.get(&key(i)), Some(val(i).as_slice()));
        }
        for i in 15..20 {
            assert_eq!(store.get(&key(i)), None);
        }
    }

    // ================================================================
    // 1. Pre-swap failures roll back
    // ================================================================

    /// # Scenario
    /// Compaction fails at each step before the live log is replaced.
    ///
    /// # Starting environment
    /// Store with overwrites and deletes (35 entries, 15 live keys).
    ///
    /// # Actions
    /// 1. Arm `fail_at` for the stage and call `compact()`.
    /// 2. Inspect the directory and the log.
    /// 3. Disarm, write one more key, then compact successfully.
    /// 4. Reopen.
    ///
    /// # Expected behavior
    /// `StoreError::Compaction { stage }`, log bytes identical to before,
    /// no artifacts, store still writable, and a later compaction works.
    #[test]
    fn pre_swap__failure_rolls_back() {
        for stage in PRE_SWAP {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("db.log");
            let mut store = churned_store(&path);
            let before = fs::read(&path).unwrap();

            store.fail_at = Some(stage);
            let err = store.compact().unwrap_err();
            assert!(
                matches!(err, StoreError::Compaction { stage: s, .. } if s == stage),
                "{stage}: {err:?}"
            );

            assert_eq!(fs::read(&path).unwrap(), before, "{stage}: log modified");
            assert_eq!(dir_entries(tmp.path()).len(), 1, "{stage}: artifact left");
            assert!(matches!(store.state, LogState::Active(_)), "{stage}");
            assert_churned_state(&store);
            assert_eq!(store.stats().log_entries, 35);

            store.fail_at = None;
            store.set(b"after", b"1").unwrap();
            store.compact().unwrap();
            assert_eq!(inspect(&path).unwrap().entries, 16, "{stage}");
            store.close().unwrap();

            let store = open(&path);
            assert_churned_state_plus_after(&store);
        }
    }

    fn assert_churned_state_plus_after(store: &Store) {
        assert_eq!(store.get(b"after"), Some(&b"1"[..]));
        assert_eq!(store.len(), 16);
        assert_eq!(store.get(&key(0)), Some(&b"second"[..]));
        assert_eq!(store.get(&key(19)), None);
    }

    /// # Scenario
    /// A leftover temporary file exists when compaction starts.
    ///
    /// # Actions
    /// 1. Plant `<log>.compact.tmp` after the store is open.
    /// 2. Compact.
    ///
    /// # Expected behavior
    /// Fails at `Snapshot` without clobbering or removing the existing
    /// file; the log is untouched.
    #[test]
    fn existing_tmp_file_is_not_clobbered() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.log");
        let mut store = churned_store(&path);
        let before = fs::read(&path).unwrap();

        let tmp_file = artifact_path(&path, TMP_SUFFIX);
        fs::write(&tmp_file, b"someone else's").unwrap();

        let err = store.compact().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Compaction {
                stage: CompactionStage::Snapshot,
                ..
            }
        ));
        assert_eq!(fs::read(&tmp_file).unwrap(), b"someone else's");
        assert_eq!(fs::read(&path).unwrap(), before);
        store.set(b"still", b"writable").unwrap();
    }

    // ================================================================
    // 2. Crash artifacts on disk
    // ================================================================

    /// # Scenario
    /// The process died between steps 2 and 4: a complete or partial
    /// rewrite sits next to the live log under either artifact name.
    ///
    /// # Actions
    /// 1. Build a store, close it.
    /// 2. Plant a partial `.compact.tmp` and a full `.compact.new` holding
    ///    different data.
    /// 3. Reopen.
    ///
    /// # Expected behavior
    /// State equals the pre-compaction state; both artifacts are removed.
    #[test]
    fn crash_before_swap__original_log_wins() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db.log");

        let mut store = churned_store(&path);
        store.close().unwrap();

        // A "compacted" log with different content.
        let other = tmp.path().join("other.log");
        let mut decoy = open(&other);
        decoy.set(b"decoy", b"!").unwrap();
        decoy.close().unwrap();
        let decoy_bytes = fs::read(&other).unwrap();
        fs::remove_file(&other).unwrap();

        fs::write(artifact_path(&path, TMP_SUFFIX), &decoy_bytes[..5]).unwrap();
        fs::write(artifact_path(&path, STAGED_SUFFIX), &decoy_bytes).unwrap();

        let store = open(&path);
        assert_churned_state(&store);
        assert_eq!(store.get(b"decoy"), None);

        let files = dir_entries(tmp.path());
        assert_eq!(files.len(), 1, "artifacts left: {files:?}");
    }

    // ================================================================
    // 3. Post-swap failures degrade the store
    // ================================================================

    /// # Scenario
    /// Compaction fails after the compacted log has replaced the original.
    ///
    /// # Actions
    /// 1. Arm `fail_at` for `SwapSync` / `Reopen`, compact.
    /// 2. Try to read, write, compact, and close.
    /// 3. Reopen.
    ///
    /// # Expected behavior
    /// `CompactionFatal { stage }`. Reads still work, mutations fail with
    /// `Degraded`, close succeeds. On disk the log is already compacted,
    /// and reopening recovers the full state.
    #[test]
    fn post_swap__failure_degrades_store() {
        for stage in POST_SWAP {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("db.log");
            let mut store = churned_store(&path);

            store.fail_at = Some(stage);
            let err = store.compact().unwrap_err();
            assert!(
                matches!(err, StoreError::CompactionFatal { stage: s, .. } if s == stage),
                "{stage}: {err:?}"
            );
            assert!(matches!(store.state, LogState::Degraded), "{stage}");

            assert_churned_state(&store);
            assert!(matches!(store.set(b"x", b"y"), Err(StoreError::Degraded)));
            assert!(matches!(store.delete(&key(0)), Err(StoreError::Degraded)));
            assert!(matches!(store.compact(), Err(StoreError::Degraded)));
            assert_eq!(store.get(&key(0)), Some(&b"second"[..]));
            store.close().unwrap();

            let summary = inspect(&path).unwrap();
            assert_eq!(summary.entries, 15, "{stage}");
            assert_eq!(summary.deletes, 0, "{stage}");
            assert_eq!(dir_entries(tmp.path()).len(), 1, "{stage}");

            let mut store = open(&path);
            assert_churned_state(&store);
            store.set(b"x", b"y").unwrap();
        }
    }
}
