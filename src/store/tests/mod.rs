pub mod helpers;
mod tests_crash_compaction;
