//! Immutable configuration snapshot threaded through the core components.
//!
//! A single `Config` is built once (by the CLI, or by a future shell) and shared
//! via `Arc` — there is no process-wide mutable settings singleton here. Every
//! tunable, including the watcher's debounce window, is a field on this struct
//! rather than a global.

use std::sync::Arc;

/// Tunables for indexing, searching, and watching. Defaults match the values
/// named in the component contracts.
#[derive(Debug, Clone)]
pub struct Config {
    /// Indexer read-buffer size, in bytes.
    pub index_chunk_size: usize,
    /// Entries per Compressed Line Offset Store block.
    pub store_block_size: usize,
    /// Bytes of a file fed to the Encoding Speculator before it is frozen.
    pub encoding_sample_bytes: u64,
    /// Lines longer than this are split into virtual lines.
    pub max_line_length: usize,
    /// Lines per search batch.
    pub search_batch_size: usize,
    /// Worker threads in the search pool.
    pub search_worker_count: usize,
    /// Total lines held across all cached FilteredIndexes before LRU eviction.
    pub search_cache_line_budget: usize,
    /// Polling fallback interval for the file watcher.
    pub watch_poll_interval_ms: u64,
    /// Debounce window for coalescing rapid-fire watch events.
    pub watch_debounce_ms: u64,
    /// Bytes hashed from the head of a file to build its `FileId`.
    pub fingerprint_sample_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_chunk_size: 1024 * 1024,
            store_block_size: 128,
            encoding_sample_bytes: 4 * 1024 * 1024,
            max_line_length: 64 * 1024,
            search_batch_size: 10,
            search_worker_count: default_worker_count(),
            search_cache_line_budget: 1_000_000,
            watch_poll_interval_ms: 1_000,
            watch_debounce_ms: 50,
            fingerprint_sample_bytes: 64 * 1024,
        }
    }
}

impl Config {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get().saturating_sub(1).max(1)).unwrap_or(1)
}
