//! File Watcher — observes a path and classifies each change as Appended,
//! Truncated/Replaced, or Removed.
//!
//! Grounded on `file_system::watcher`'s `notify_debouncer_full` usage
//! (debounced native OS events, default 200 ms there; this crate defaults to
//! the spec's 50 ms event-coalescing window and a separate 1 s poll fallback).
//! Unlike the teacher's directory-diff watcher, this watches a single file
//! and also runs a polling thread alongside the native watcher — the spec's
//! "native OR polling, at least one active" correctness requirement, needed
//! because native events are unreliable over network filesystems and across
//! editor-style atomic renames.
//!
//! Per spec.md/`SPEC_FULL.md` §4.7, multiple `watch()` calls on the same path
//! share one underlying native watch and poll thread: a process-wide,
//! path-keyed registry of weakly-held `WatchHandle`s hands back the existing
//! handle when one is still alive, and tears the native watch and poll
//! thread down once the last `Registration` referencing it is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, Weak};
use std::thread;
use std::time::Duration;

use log::warn;
use notify::{RecursiveMode, Watcher as NotifyWatcherTrait};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::config::Config;
use crate::file_id;
use crate::ignore_poison::IgnorePoison;

/// How a watched file changed, classified by the most severe kind observed
/// within one debounce window (Removed > Replaced > Appended).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEvent {
    Appended,
    TruncatedOrReplaced,
    Removed,
}

type Listener = Box<dyn Fn(FileEvent) + Send + Sync>;

/// The length-stable content window `classify_and_dispatch` last compared
/// against: the byte range `[0, hashed_len)` existed at the time of the
/// previous check and hashed to `hash`. Re-hashing that same byte count
/// (rather than "whatever now fits in `sample_bytes`") is what makes growth
/// of a file smaller than `sample_bytes` classify as `Appended` instead of
/// `TruncatedOrReplaced`.
#[derive(Debug, Clone, Copy)]
struct WindowSnapshot {
    device: u64,
    inode: u64,
    hashed_len: u64,
    hash: u64,
}

struct WatchState {
    path: PathBuf,
    sample_bytes: usize,
    last_size: Mutex<u64>,
    last_window: Mutex<Option<WindowSnapshot>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    stopped: AtomicBool,
}

impl WatchState {
    fn classify_and_dispatch(&self) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            self.emit(FileEvent::Removed);
            return;
        };
        let new_size = metadata.len();
        let (device, inode) = file_id::metadata_ids(&metadata);

        let mut last_size = self.last_size.lock_ignore_poison();
        let mut last_window = self.last_window.lock_ignore_poison();

        if let Some(prev) = *last_window
            && prev.device == device
            && prev.inode == inode
            && new_size == *last_size
        {
            return; // no observable change
        }

        let event = match *last_window {
            // Re-hash exactly the byte range we hashed last time, not a
            // window sized off the file's (possibly now larger) current
            // size — that's what keeps a pure append from looking like a
            // content change in the shared prefix.
            Some(prev) if prev.device == device && prev.inode == inode && new_size >= prev.hashed_len => {
                match file_id::read_prefix(&self.path, prev.hashed_len as usize) {
                    Ok(bytes) if file_id::hash_bytes(&bytes) == prev.hash => FileEvent::Appended,
                    Ok(_) => FileEvent::TruncatedOrReplaced,
                    Err(_) => FileEvent::Removed,
                }
            }
            _ => FileEvent::TruncatedOrReplaced,
        };

        *last_size = new_size;
        *last_window = sample_window(&self.path, self.sample_bytes, device, inode);
        drop(last_size);
        drop(last_window);

        self.emit(event);
    }

    fn emit(&self, event: FileEvent) {
        for (_, listener) in self.listeners.lock_ignore_poison().iter() {
            listener(event);
        }
    }

    fn add_listener(&self, listener: Listener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock_ignore_poison().push((id, listener));
        id
    }

    fn remove_listener(&self, id: u64) {
        self.listeners.lock_ignore_poison().retain(|(lid, _)| *lid != id);
    }
}

/// Samples a fresh `sample_bytes`-wide window at the file's current size,
/// for the next round of comparison. `None` if the file can no longer be read.
fn sample_window(path: &Path, sample_bytes: usize, device: u64, inode: u64) -> Option<WindowSnapshot> {
    let bytes = file_id::read_prefix(path, sample_bytes).ok()?;
    Some(WindowSnapshot { device, inode, hashed_len: bytes.len() as u64, hash: file_id::hash_bytes(&bytes) })
}

/// The native watch + poll thread backing every `Registration` sharing one
/// path. Torn down when the last such `Registration` is dropped.
struct WatchHandle {
    state: Arc<WatchState>,
    _poll_thread: Option<thread::JoinHandle<()>>,
    _native: Option<notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::RecommendedCache>>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.state.stopped.store(true, Ordering::Relaxed);
    }
}

/// Process-wide, path-keyed table of in-flight watches. Entries are weak so
/// a path whose last `Registration` was dropped doesn't keep its
/// `WatchHandle` (and background threads) alive. Same shape as the
/// teacher's own `SESSIONS: LazyLock<Mutex<HashMap<...>>>` session table.
static REGISTRY: LazyLock<Mutex<HashMap<PathBuf, Weak<WatchHandle>>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// RAII handle to a watch subscription. Dropping it detaches this listener;
/// the underlying native watch and poll thread for the path keep running as
/// long as another `Registration` on the same path is still alive. Safe to
/// drop from any thread.
pub struct Registration {
    handle: Arc<WatchHandle>,
    listener_id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.handle.state.remove_listener(self.listener_id);
    }
}

/// Watches a single path, dispatching classified `FileEvent`s to `listener`.
///
/// Multiple calls to `watch()` on the same path share one underlying
/// `WatchHandle`: the first call starts a native OS watch (via `notify`,
/// debounced) and a polling thread; later calls on the same path, made while
/// that handle is still alive, just register another listener on it. Either
/// source noticing a change runs the same classification, so both agree on
/// the resulting event.
pub fn watch(path: impl Into<PathBuf>, config: &Config, listener: Listener) -> Registration {
    let path = path.into();
    let mut registry = REGISTRY.lock_ignore_poison();
    registry.retain(|_, handle| handle.strong_count() > 0);

    let handle = match registry.get(&path).and_then(Weak::upgrade) {
        Some(handle) => handle,
        None => {
            let handle = Arc::new(build_watch_handle(path.clone(), config));
            registry.insert(path.clone(), Arc::downgrade(&handle));
            handle
        }
    };
    drop(registry);

    let listener_id = handle.state.add_listener(listener);
    Registration { handle, listener_id }
}

fn build_watch_handle(path: PathBuf, config: &Config) -> WatchHandle {
    let initial_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let initial_window = std::fs::metadata(&path).ok().and_then(|metadata| {
        let (device, inode) = file_id::metadata_ids(&metadata);
        sample_window(&path, config.fingerprint_sample_bytes, device, inode)
    });

    let state = Arc::new(WatchState {
        path: path.clone(),
        sample_bytes: config.fingerprint_sample_bytes,
        last_size: Mutex::new(initial_size),
        last_window: Mutex::new(initial_window),
        listeners: Mutex::new(Vec::new()),
        next_listener_id: AtomicU64::new(0),
        stopped: AtomicBool::new(false),
    });

    let native = {
        let state = state.clone();
        let debounce = Duration::from_millis(config.watch_debounce_ms);
        new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                // Either way the file may have changed; re-check and classify.
                // The poll thread is the correctness fallback if this doesn't fire.
                Ok(_events) => state.classify_and_dispatch(),
                Err(_errors) => state.classify_and_dispatch(),
            }
        })
        .map_err(|e| warn!("native watcher setup failed for {}, falling back to polling only: {e}", path.display()))
        .ok()
        .and_then(|mut debouncer| {
            let watch_target: &Path = path.parent().unwrap_or(&path);
            if let Err(e) = debouncer.watch(watch_target, RecursiveMode::NonRecursive) {
                warn!("native watch() failed for {}, falling back to polling only: {e}", path.display());
                return None;
            }
            Some(debouncer)
        })
    };

    let poll_thread = {
        let state = state.clone();
        let interval = Duration::from_millis(config.watch_poll_interval_ms);
        Some(thread::spawn(move || {
            while !state.stopped.load(Ordering::Relaxed) {
                thread::sleep(interval);
                state.classify_and_dispatch();
            }
        }))
    };

    WatchHandle { state, _poll_thread: poll_thread, _native: native }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc;

    #[test]
    fn append_is_classified_as_appended() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        f.flush().unwrap();

        let config = Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..Config::default() };
        let (tx, rx) = mpsc::channel();
        let _registration = watch(f.path(), &config, Box::new(move |e| {
            let _ = tx.send(e);
        }));

        f.write_all(b" world").unwrap();
        f.flush().unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).expect("expected a watch event");
        assert_eq!(event, FileEvent::Appended);
    }

    #[test]
    fn replace_with_different_content_is_classified_as_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"original content here").unwrap();

        let config = Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..Config::default() };
        let (tx, rx) = mpsc::channel();
        let _registration = watch(&path, &config, Box::new(move |e| {
            let _ = tx.send(e);
        }));

        std::fs::write(&path, b"unrelated").unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).expect("expected a watch event");
        assert_eq!(event, FileEvent::TruncatedOrReplaced);
    }

    #[test]
    fn repeated_small_appends_stay_appended_across_checks() {
        // Regression test: a file smaller than `fingerprint_sample_bytes`
        // must keep classifying as Appended across several growth steps, not
        // just the first one, since each check re-samples a fresh window.
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"a").unwrap();
        f.flush().unwrap();

        let config = Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..Config::default() };
        let (tx, rx) = mpsc::channel();
        let _registration = watch(f.path(), &config, Box::new(move |e| {
            let _ = tx.send(e);
        }));

        for _ in 0..3 {
            f.write_all(b"bbbbb").unwrap();
            f.flush().unwrap();
            let event = rx.recv_timeout(Duration::from_secs(2)).expect("expected a watch event");
            assert_eq!(event, FileEvent::Appended);
        }
    }

    #[test]
    fn concurrent_registrations_on_same_path_share_one_watch() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        f.flush().unwrap();

        let config = Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..Config::default() };
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let reg_a = watch(f.path(), &config, Box::new(move |e| {
            let _ = tx_a.send(e);
        }));
        let reg_b = watch(f.path(), &config, Box::new(move |e| {
            let _ = tx_b.send(e);
        }));
        assert!(Arc::ptr_eq(&reg_a.handle, &reg_b.handle));

        f.write_all(b" world").unwrap();
        f.flush().unwrap();

        assert_eq!(rx_a.recv_timeout(Duration::from_secs(2)).unwrap(), FileEvent::Appended);
        assert_eq!(rx_b.recv_timeout(Duration::from_secs(2)).unwrap(), FileEvent::Appended);

        // Dropping one registration must not stop the watch for the other.
        drop(reg_a);
        f.write_all(b"!").unwrap();
        f.flush().unwrap();
        assert_eq!(rx_b.recv_timeout(Duration::from_secs(2)).unwrap(), FileEvent::Appended);
    }

    #[test]
    fn removal_is_classified_as_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"content").unwrap();

        let config = Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..Config::default() };
        let (tx, rx) = mpsc::channel();
        let _registration = watch(&path, &config, Box::new(move |e| {
            let _ = tx.send(e);
        }));

        std::fs::remove_file(&path).unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).expect("expected a watch event");
        assert_eq!(event, FileEvent::Removed);
    }
}
