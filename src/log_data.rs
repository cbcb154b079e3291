//! Log Data — façade over (Byte Source, Compressed Line Store, Indexer,
//! Encoding). Exposes line count, raw byte range for line N, decoded line
//! text, and live-update handling.
//!
//! Grounded on `file_viewer::session::ViewerSession` (open a backend, track a
//! path, spawn a background thread) and `file_viewer::mod::FileViewerBackend`
//! (the trait this module's `LogDataView` generalizes), restructured per
//! `SPEC_FULL.md` §4.4: one concrete `LogData` per opened file, not a
//! session-keyed global table — the teacher's `SESSIONS` map is a shell-facing
//! convenience for a multi-window Tauri app and has no place in the core.
//!
//! Live-update handling (`Appended` / `TruncatedOrReplaced` / `Removed`)
//! mirrors `file_system::watcher::handle_directory_change`'s three-way branch,
//! generalized from directory diffing to single-file rotation.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};

use crate::byte_source::{ByteSource, FileByteSource};
use crate::concurrency::{CancelToken, spawn_named};
use crate::config::Config;
use crate::encoding::{Encoding, decode, sniff_bom};
use crate::error::KloggError;
use crate::file_id::FileId;
use crate::indexer::{IndexProgress, Indexer};
use crate::ignore_poison::IgnorePoison;
use crate::store::CompressedLineStore;
use crate::watcher::{self, FileEvent, Registration as WatchRegistration};

/// Events a `LogData` (or a downstream `FilteredLogData`) delivers to
/// attached listeners. Progress and structural changes are delivered
/// separately from each other, per `SPEC_FULL.md` §7.
#[derive(Debug, Clone)]
pub enum LogEvent {
    /// Indexing made progress within the current generation.
    Progress(IndexProgress),
    /// The underlying file was replaced with different content; all prior
    /// line numbers are invalid.
    Rotated,
    /// The underlying file disappeared. Indexing is paused.
    SourceMissing,
    /// The underlying file reappeared (classified as a rotation, since a
    /// recreated file almost never reuses the same inode).
    SourceReappeared,
    /// A read error interrupted indexing; it will retry on the next watch
    /// signal.
    Error(String),
}

pub type Listener = Box<dyn Fn(LogEvent) + Send + Sync>;

/// RAII handle to an attached listener. Dropping it removes the listener
/// exactly once, mirroring `watcher::Registration`.
pub struct ListenerRegistration {
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    id: u64,
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        self.listeners.lock_ignore_poison().retain(|(id, _)| *id != self.id);
    }
}

impl ListenerRegistration {
    /// Builds a registration over a caller-supplied listener list, used by
    /// `FilteredLogData` when its parent has already been dropped and there
    /// is no real subscription to hand back.
    pub(crate) fn detached(listeners: Arc<Mutex<Vec<(u64, Listener)>>>, id: u64) -> Self {
        Self { listeners, id }
    }
}

fn dispatch(listeners: &Mutex<Vec<(u64, Listener)>>, event: LogEvent) {
    for (_, listener) in listeners.lock_ignore_poison().iter() {
        listener(event.clone());
    }
}

/// Capability shared by `LogData` and `FilteredLogData`, per the design note
/// in `SPEC_FULL.md` §9: a single flat interface instead of an inheritance
/// hierarchy.
pub trait LogDataView: Send + Sync {
    fn line_count(&self) -> u64;
    fn line_byte_range(&self, line: u64) -> Result<(u64, u64), KloggError>;
    fn line_text(&self, line: u64) -> Result<String, KloggError>;
    fn attach_listener(&self, listener: Listener) -> ListenerRegistration;
}

enum IndexerCommand {
    Delta(u64),
    Rotate,
    Stop,
}

struct StateInner {
    encoding: Encoding,
    encoding_overridden: bool,
    bytes_indexed: u64,
    partial_tail: u64,
    source_missing: bool,
    generation: u64,
    last_error: Option<String>,
}

/// Shared state reachable from both the owning `LogData` and its background
/// indexer thread.
struct Shared {
    config: Arc<Config>,
    path: PathBuf,
    source: FileByteSource,
    store: RwLock<CompressedLineStore>,
    state: Mutex<StateInner>,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: AtomicU64,
}

impl Shared {
    fn dispatch(&self, event: LogEvent) {
        dispatch(&self.listeners, event);
    }

    fn current_file_size(&self) -> u64 {
        self.source.size().unwrap_or(0)
    }
}

/// Owns the exclusive write path to a file's `CompressedLineStore`: a
/// dedicated byte source, a background indexer thread, and a watch
/// registration. Readers (`line_text`, `line_byte_range`, `line_count`) run
/// on the caller's thread and never block on indexing.
pub struct LogData {
    shared: Arc<Shared>,
    cancel: CancelToken,
    command_tx: Sender<IndexerCommand>,
    indexer_thread: Option<std::thread::JoinHandle<()>>,
    _watch: WatchRegistration,
}

impl LogData {
    /// Opens `path`, starting a background initial scan and a live watch.
    /// Returns immediately; `line_count()` grows as the indexer makes progress
    /// — callers that need a fully-indexed file synchronously should attach a
    /// listener and wait for a `Progress` event whose `bytes_indexed` equals
    /// the file's size at open time.
    pub fn open(path: impl Into<PathBuf>, config: Arc<Config>) -> Result<Self, KloggError> {
        let path = path.into();
        let source = FileByteSource::new(&path);
        // Fail fast if the file cannot even be opened once.
        source.size()?;

        let shared = Arc::new(Shared {
            config: config.clone(),
            path: path.clone(),
            source,
            store: RwLock::new(CompressedLineStore::new(config.store_block_size as u64)),
            state: Mutex::new(StateInner {
                encoding: Encoding::Ascii7,
                encoding_overridden: false,
                bytes_indexed: 0,
                partial_tail: 0,
                source_missing: false,
                generation: 0,
                last_error: None,
            }),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        });

        let cancel = CancelToken::new();
        let (command_tx, command_rx) = mpsc::channel::<IndexerCommand>();

        let indexer_thread = {
            let shared = shared.clone();
            let cancel = cancel.clone();
            Some(spawn_named("klogg-indexer", move || {
                run_indexer_thread(shared, cancel, command_rx);
            }))
        };

        let watch = {
            let shared = shared.clone();
            let tx = command_tx.clone();
            watcher::watch(
                &path,
                &config,
                Box::new(move |event| on_watch_event(&shared, &tx, event)),
            )
        };

        Ok(Self { shared, cancel, command_tx, indexer_thread, _watch: watch })
    }

    /// Overrides the speculated encoding.
    pub fn set_encoding(&self, encoding: Encoding) {
        let mut state = self.shared.state.lock_ignore_poison();
        state.encoding = encoding;
        state.encoding_overridden = true;
    }

    pub fn encoding(&self) -> Encoding {
        self.shared.state.lock_ignore_poison().encoding
    }

    pub fn file_id(&self) -> Result<FileId, KloggError> {
        FileId::compute(&self.shared.path, self.shared.config.fingerprint_sample_bytes)
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Epoch counter, incremented on every rotation. Exposed for diagnostics;
    /// cache/view invalidation keys off `FileId` instead, since a rotation
    /// that preserves content (identical prefix hash) is not observable here.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock_ignore_poison().generation
    }

    pub fn source_missing(&self) -> bool {
        self.shared.state.lock_ignore_poison().source_missing
    }
}

impl LogDataView for LogData {
    fn line_count(&self) -> u64 {
        self.shared.store.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn line_byte_range(&self, line: u64) -> Result<(u64, u64), KloggError> {
        let store = self.shared.store.read().unwrap_or_else(|e| e.into_inner());
        if line >= store.len() {
            return Err(KloggError::InternalConsistency(format!(
                "line_byte_range({line}) out of range (line_count = {})",
                store.len()
            )));
        }
        let begin = store.at(line);
        let end = if line + 1 < store.len() { store.at(line + 1) } else { self.shared.current_file_size() };
        Ok((begin, end))
    }

    fn line_text(&self, line: u64) -> Result<String, KloggError> {
        let (begin, end) = self.line_byte_range(line)?;
        let len = (end - begin) as usize;
        let bytes = self.shared.source.read_at(begin, len)?;
        let encoding = self.shared.state.lock_ignore_poison().encoding;
        Ok(decode(trim_line_terminator(&bytes), encoding))
    }

    fn attach_listener(&self, listener: Listener) -> ListenerRegistration {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock_ignore_poison().push((id, listener));
        ListenerRegistration { listeners: self.shared.listeners.clone(), id }
    }
}

impl Drop for LogData {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Unblock the indexer thread's `recv()` if it is idle between passes.
        let _ = self.command_tx.send(IndexerCommand::Stop);
        if let Some(handle) = self.indexer_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Strips a single trailing LF (the line terminator) from a line's raw bytes
/// before decoding — line terminators are part of the byte range (per the
/// glossary) but not part of the decoded text.
fn trim_line_terminator(bytes: &[u8]) -> &[u8] {
    match bytes.last() {
        Some(b'\n') => &bytes[..bytes.len() - 1],
        _ => bytes,
    }
}

fn on_watch_event(shared: &Arc<Shared>, tx: &Sender<IndexerCommand>, event: FileEvent) {
    match event {
        FileEvent::Appended => {
            let was_missing = {
                let mut state = shared.state.lock_ignore_poison();
                std::mem::replace(&mut state.source_missing, false)
            };
            if was_missing {
                shared.dispatch(LogEvent::SourceReappeared);
            }
            let from = shared.state.lock_ignore_poison().bytes_indexed;
            let _ = tx.send(IndexerCommand::Delta(from));
        }
        FileEvent::TruncatedOrReplaced => {
            let _ = tx.send(IndexerCommand::Rotate);
        }
        FileEvent::Removed => {
            let mut state = shared.state.lock_ignore_poison();
            state.source_missing = true;
            drop(state);
            shared.dispatch(LogEvent::SourceMissing);
        }
    }
}

fn run_indexer_thread(shared: Arc<Shared>, cancel: CancelToken, rx: mpsc::Receiver<IndexerCommand>) {
    do_initial_scan(&shared, &cancel);

    while let Ok(command) = rx.recv() {
        if cancel.is_cancelled() {
            break;
        }
        match command {
            IndexerCommand::Delta(from) => do_delta_scan(&shared, &cancel, from),
            IndexerCommand::Rotate => do_rotate(&shared, &cancel),
            IndexerCommand::Stop => break,
        }
    }
    debug!("indexer thread exiting for {}", shared.path.display());
}

fn sniff_and_seed_encoding(shared: &Shared) {
    if shared.state.lock_ignore_poison().encoding_overridden {
        return;
    }
    let Ok(head) = shared.source.read_at(0, 4) else { return };
    if let Some((encoding, _bom_len)) = sniff_bom(&head) {
        shared.state.lock_ignore_poison().encoding = encoding;
    }
}

fn do_initial_scan(shared: &Arc<Shared>, cancel: &CancelToken) {
    sniff_and_seed_encoding(shared);
    let mut indexer = Indexer::new(shared.config.clone());
    let mut store = shared.store.write().unwrap_or_else(|e| e.into_inner());
    let result = indexer.run_initial(&shared.source, &mut store, cancel.as_atomic(), &mut |progress| {
        shared.dispatch(LogEvent::Progress(progress));
    });
    drop(store);
    apply_scan_result(shared, indexer.encoding_guess(), result);
}

fn do_delta_scan(shared: &Arc<Shared>, cancel: &CancelToken, from_offset: u64) {
    let mut indexer = Indexer::new(shared.config.clone());
    let mut store = shared.store.write().unwrap_or_else(|e| e.into_inner());
    let result = indexer.run_delta(&shared.source, &mut store, from_offset, cancel.as_atomic(), &mut |progress| {
        shared.dispatch(LogEvent::Progress(progress));
    });
    drop(store);
    apply_scan_result(shared, indexer.encoding_guess(), result);
}

fn do_rotate(shared: &Arc<Shared>, cancel: &CancelToken) {
    info!("rotation detected for {}, resetting store", shared.path.display());
    {
        let mut store = shared.store.write().unwrap_or_else(|e| e.into_inner());
        *store = CompressedLineStore::new(shared.config.store_block_size as u64);
    }
    {
        let mut state = shared.state.lock_ignore_poison();
        state.bytes_indexed = 0;
        state.partial_tail = 0;
        state.generation += 1;
        state.source_missing = false;
        if !state.encoding_overridden {
            state.encoding = Encoding::Ascii7;
        }
    }
    // Rotation is delivered before any further progress event from this pass,
    // per the pinned Open Question resolution in SPEC_FULL.md §9.3.
    shared.dispatch(LogEvent::Rotated);
    do_initial_scan(shared, cancel);
}

fn apply_scan_result(shared: &Arc<Shared>, guess: Encoding, result: Result<crate::indexer::IndexResult, KloggError>) {
    match result {
        Ok(result) => {
            let mut state = shared.state.lock_ignore_poison();
            state.bytes_indexed = result.bytes_indexed;
            state.partial_tail = result.partial_tail;
            if !state.encoding_overridden {
                state.encoding = guess;
            }
            state.last_error = None;
        }
        Err(e) => {
            warn!("read error during indexing of {}: {e}", shared.path.display());
            shared.state.lock_ignore_poison().last_error = Some(e.to_string());
            shared.dispatch(LogEvent::Error(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::Duration;

    fn wait_for_line_count(log: &LogData, want: u64) {
        for _ in 0..200 {
            if log.line_count() >= want {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for line_count >= {want}, got {}", log.line_count());
    }

    #[test]
    fn open_indexes_existing_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"alpha\nbeta\ngamma\n").unwrap();
        f.flush().unwrap();

        let log = LogData::open(f.path(), Config::shared()).unwrap();
        wait_for_line_count(&log, 3);
        assert_eq!(log.line_text(0).unwrap(), "alpha");
        assert_eq!(log.line_text(2).unwrap(), "gamma");
    }

    #[test]
    fn append_grows_line_count_live() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"one\n").unwrap();
        f.flush().unwrap();

        let config =
            Arc::new(Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..(*Config::shared()).clone() });
        let log = LogData::open(f.path(), config).unwrap();
        wait_for_line_count(&log, 1);

        f.write_all(b"two\nthree\n").unwrap();
        f.flush().unwrap();
        wait_for_line_count(&log, 3);
        assert_eq!(log.line_text(1).unwrap(), "two");
        assert_eq!(log.line_text(2).unwrap(), "three");
    }

    #[test]
    fn rotation_resets_and_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"first\nsecond\n").unwrap();

        let config =
            Arc::new(Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..(*Config::shared()).clone() });
        let log = LogData::open(&path, config).unwrap();
        wait_for_line_count(&log, 2);

        let (tx, rx) = mpsc::channel();
        let _reg = log.attach_listener(Box::new(move |event| {
            if matches!(event, LogEvent::Rotated) {
                let _ = tx.send(());
            }
        }));

        std::fs::write(&path, b"unrelated content entirely\n").unwrap();
        assert_ne!(rx.recv_timeout(Duration::from_secs(2)), Err(RecvTimeoutError::Timeout));

        wait_for_line_count(&log, 1);
        assert_eq!(log.line_text(0).unwrap(), "unrelated content entirely");
    }
}
