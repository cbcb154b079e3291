//! Executor primitives — submit/cancel task plumbing shared by the indexer,
//! the search worker pool, and the watcher thread.
//!
//! Grounded on the teacher's own `thread::spawn` + `Arc<AtomicBool>` cancel-flag
//! pattern (`file_viewer::session::search_start`, `search_cancel`): this crate
//! keeps the same shape — plain OS threads, no async runtime — and gives it a
//! name (`CancelToken`) and a named-thread spawn helper so every background
//! task in the crate starts the same way and panics carry a thread name.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// A shared cancellation flag. Clones observe the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Exposes the raw flag for APIs (like `Indexer::run_initial`) written
    /// against `&AtomicBool` directly.
    pub fn as_atomic(&self) -> &AtomicBool {
        &self.0
    }
}

/// Spawns a named background thread. Panics if the OS refuses to create a
/// thread — same failure mode the teacher accepts from bare `thread::spawn`.
pub fn spawn_named<F>(name: &str, f: F) -> thread::JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .unwrap_or_else(|e| panic!("failed to spawn thread '{name}': {e}"))
}
