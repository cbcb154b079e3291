//! Search Engine — given a `LogData` and a compiled regex, produces a
//! *Filtered Index*: an ordered sequence of matching source line numbers,
//! built incrementally by a bounded worker pool with cancellation and a
//! chunked result cache.
//!
//! Grounded on the teacher's linear per-line search methods
//! (`file_viewer::byte_seek::ByteSeekBackend::search`,
//! `file_viewer::session::search_start`/`search_poll`/`search_cancel`),
//! generalized from a fixed substring scan on one spawned thread to the
//! batch/worker-pool/min-heap-merge design `SPEC_FULL.md` §4.5 and §5
//! require. The worker pool uses `std::thread` + an explicit bounded queue
//! and a batch-id-ordered min-heap merge rather than `rayon`'s work-stealing
//! pool, because the ordering requirement ("results merged in line-number
//! order... a small min-heap keyed by batch id") is most directly expressed
//! that way — see `DESIGN.md`.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

use log::debug;
use regex::{Regex, RegexBuilder};

use crate::concurrency::{CancelToken, spawn_named};
use crate::config::Config;
use crate::error::KloggError;
use crate::file_id::FileId;
use crate::ignore_poison::IgnorePoison;
use crate::log_data::{ListenerRegistration, LogData, LogDataView, LogEvent};

const PAGE_SIZE: usize = 4096;

/// An ordered, append-only sequence of matching parent line numbers, paged to
/// bound peak allocation churn. Readers take an atomic length snapshot and
/// may read any index below it while only the writer ever takes the page
/// lock's write side.
pub struct FilteredIndex {
    pages: std::sync::RwLock<Vec<Vec<u64>>>,
    len: AtomicU64,
}

impl Default for FilteredIndex {
    fn default() -> Self {
        Self { pages: std::sync::RwLock::new(Vec::new()), len: AtomicU64::new(0) }
    }
}

impl FilteredIndex {
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: u64) -> Option<u64> {
        if index >= self.len() {
            return None;
        }
        let pages = self.pages.read().unwrap_or_else(|e| e.into_inner());
        let page = (index / PAGE_SIZE as u64) as usize;
        let within = (index % PAGE_SIZE as u64) as usize;
        pages.get(page).and_then(|p| p.get(within)).copied()
    }

    /// Matching line numbers in `[range.start, range.end)`, clamped to the
    /// current length.
    pub fn range(&self, range: std::ops::Range<u64>) -> Vec<u64> {
        let end = range.end.min(self.len());
        if range.start >= end {
            return Vec::new();
        }
        let pages = self.pages.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity((end - range.start) as usize);
        for index in range.start..end {
            let page = (index / PAGE_SIZE as u64) as usize;
            let within = (index % PAGE_SIZE as u64) as usize;
            if let Some(v) = pages.get(page).and_then(|p| p.get(within)) {
                out.push(*v);
            }
        }
        out
    }

    fn push(&self, line: u64) {
        let mut pages = self.pages.write().unwrap_or_else(|e| e.into_inner());
        if pages.last().is_none_or(|p| p.len() == PAGE_SIZE) {
            pages.push(Vec::with_capacity(PAGE_SIZE));
        }
        pages.last_mut().expect("just ensured a page exists").push(line);
        drop(pages);
        self.len.fetch_add(1, Ordering::Release);
    }

    fn reset(&self) {
        *self.pages.write().unwrap_or_else(|e| e.into_inner()) = Vec::new();
        self.len.store(0, Ordering::Release);
    }
}

/// Lifecycle of an active or completed search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Running,
    Paused,
    Done,
    Cancelled,
}

/// A point-in-time snapshot of a search's progress.
#[derive(Debug, Clone)]
pub struct SearchState {
    pub bytes_searched: u64,
    pub matches_count: u64,
    pub status: Status,
    pub last_error: Option<String>,
}

/// Compile-time and matching options for a search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub case_insensitive: bool,
    /// Treat `pattern` as a literal string rather than a regular expression.
    pub fixed_string: bool,
    /// Extended/verbose syntax: whitespace in the pattern is insignificant
    /// and `#` starts a comment to end of line, same as Perl's `/x` flag.
    /// Ignored when `fixed_string` is set, since the pattern is escaped first.
    pub extended: bool,
    /// Subscribe to the parent's `Appended` events and keep extending the
    /// match set as the parent grows; restart from offset 0 on `Rotated`.
    pub auto_refresh: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { case_insensitive: false, fixed_string: false, extended: false, auto_refresh: false }
    }
}

struct BatchJob {
    id: u64,
    start: u64,
    end: u64,
}

struct BatchResult {
    id: u64,
    end: u64,
    matches: Vec<u64>,
    error: Option<String>,
}

impl PartialEq for BatchResult {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for BatchResult {}
impl PartialOrd for BatchResult {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for BatchResult {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

enum DriverCommand {
    GrowTo(u64),
    Reset,
    Stop,
}

struct SearchShared {
    filtered: Arc<FilteredIndex>,
    status: Mutex<Status>,
    bytes_searched: AtomicU64,
    last_error: Mutex<Option<String>>,
    cancel: CancelToken,
}

impl SearchShared {
    fn snapshot(&self) -> SearchState {
        SearchState {
            bytes_searched: self.bytes_searched.load(Ordering::Acquire),
            matches_count: self.filtered.len(),
            status: *self.status.lock_ignore_poison(),
            last_error: self.last_error.lock_ignore_poison().clone(),
        }
    }
}

/// Handle to an active or completed search. Dropping it cancels and joins
/// the underlying driver thread.
pub struct SearchHandle {
    shared: Arc<SearchShared>,
    command_tx: Option<Sender<DriverCommand>>,
    driver_thread: Option<std::thread::JoinHandle<()>>,
    _parent_listener: Option<ListenerRegistration>,
}

impl SearchHandle {
    /// Requests cancellation. Returns promptly; the partial `FilteredIndex`
    /// is retained. Safe to call more than once.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        if let Some(tx) = &self.command_tx {
            let _ = tx.send(DriverCommand::Stop);
        }
    }

    pub fn progress(&self) -> SearchState {
        self.shared.snapshot()
    }

    pub fn matches(&self, range: std::ops::Range<u64>) -> Vec<u64> {
        self.shared.filtered.range(range)
    }

    pub fn filtered_index(&self) -> Arc<FilteredIndex> {
        self.shared.filtered.clone()
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(tx) = self.command_tx.take() {
            let _ = tx.send(DriverCommand::Stop);
        }
        if let Some(handle) = self.driver_thread.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pattern: String,
    case_insensitive: bool,
    fixed_string: bool,
    extended: bool,
    file_id: FileId,
}

impl CacheKey {
    fn new(pattern: &str, options: &SearchOptions, file_id: FileId) -> Self {
        Self {
            pattern: pattern.to_string(),
            case_insensitive: options.case_insensitive,
            fixed_string: options.fixed_string,
            extended: options.extended,
            file_id,
        }
    }
}

struct CacheEntry {
    key: CacheKey,
    filtered: Arc<FilteredIndex>,
}

/// Bounded LRU cache of completed `FilteredIndex`es, owned by one
/// `SearchEngine` instance (never a process-wide singleton, per
/// `SPEC_FULL.md` §2's ambient-stack note). Keyed by `(pattern, flags,
/// FileId)`; a rotation changes `FileId`, so stale entries simply stop
/// matching new lookups and age out under the line budget — no explicit
/// invalidation pass is needed.
struct Cache {
    entries: VecDeque<CacheEntry>,
    total_lines: usize,
    budget: usize,
}

impl Cache {
    fn new(budget: usize) -> Self {
        Self { entries: VecDeque::new(), total_lines: 0, budget }
    }

    fn get(&mut self, key: &CacheKey) -> Option<Arc<FilteredIndex>> {
        let pos = self.entries.iter().position(|e| &e.key == key)?;
        let entry = self.entries.remove(pos).expect("position came from this deque");
        let filtered = entry.filtered.clone();
        self.entries.push_back(entry);
        Some(filtered)
    }

    fn insert(&mut self, key: CacheKey, filtered: Arc<FilteredIndex>) {
        let lines = filtered.len() as usize;
        self.entries.push_back(CacheEntry { key, filtered });
        self.total_lines += lines;
        while self.total_lines > self.budget {
            let Some(evicted) = self.entries.pop_front() else { break };
            self.total_lines = self.total_lines.saturating_sub(evicted.filtered.len() as usize);
        }
    }
}

/// Owns the worker pool sizing, batch sizing, and result cache for a series
/// of searches against (potentially several) `LogData` instances.
pub struct SearchEngine {
    config: Arc<Config>,
    cache: Arc<Mutex<Cache>>,
}

impl SearchEngine {
    pub fn new(config: Arc<Config>) -> Self {
        let budget = config.search_cache_line_budget;
        Self { config, cache: Arc::new(Mutex::new(Cache::new(budget))) }
    }

    /// Compiles `pattern` and starts a search over `parent`. Compile errors
    /// surface synchronously; everything else happens in background threads.
    pub fn start(
        &self,
        parent: &Arc<LogData>,
        pattern: &str,
        options: SearchOptions,
    ) -> Result<SearchHandle, KloggError> {
        let pattern_text = if options.fixed_string { regex::escape(pattern) } else { pattern.to_string() };
        let regex = RegexBuilder::new(&pattern_text)
            .case_insensitive(options.case_insensitive)
            .ignore_whitespace(options.extended && !options.fixed_string)
            .build()?;

        let file_id = parent.file_id().ok();

        if !options.auto_refresh
            && let Some(file_id) = file_id
            && let Some(filtered) = self.cache.lock_ignore_poison().get(&CacheKey::new(&pattern_text, &options, file_id))
        {
            debug!("search cache hit for pattern {pattern_text:?}");
            let total_bytes =
                parent.line_byte_range(parent.line_count().saturating_sub(1)).map(|r| r.1).unwrap_or(0);
            let shared = Arc::new(SearchShared {
                filtered,
                status: Mutex::new(Status::Done),
                bytes_searched: AtomicU64::new(total_bytes),
                last_error: Mutex::new(None),
                cancel: CancelToken::new(),
            });
            return Ok(SearchHandle { shared, command_tx: None, driver_thread: None, _parent_listener: None });
        }

        let shared = Arc::new(SearchShared {
            filtered: Arc::new(FilteredIndex::default()),
            status: Mutex::new(Status::Running),
            bytes_searched: AtomicU64::new(0),
            last_error: Mutex::new(None),
            cancel: CancelToken::new(),
        });

        let (command_tx, command_rx) = mpsc::channel::<DriverCommand>();

        let parent_listener = if options.auto_refresh {
            let tx = command_tx.clone();
            Some(parent.attach_listener(Box::new(move |event| match event {
                LogEvent::Progress(p) => {
                    let _ = tx.send(DriverCommand::GrowTo(p.line_count));
                }
                LogEvent::Rotated => {
                    let _ = tx.send(DriverCommand::Reset);
                }
                _ => {}
            })))
        } else {
            None
        };

        let cache_key = if options.auto_refresh { None } else { file_id.map(|id| CacheKey::new(&pattern_text, &options, id)) };

        let config = self.config.clone();
        let parent_clone = parent.clone();
        let shared_clone = shared.clone();
        let cache = self.cache.clone();
        let auto_refresh = options.auto_refresh;

        let driver_thread = spawn_named("klogg-search-driver", move || {
            run_search_driver(&parent_clone, &regex, &config, &shared_clone, command_rx, auto_refresh, cache_key, &cache);
        });

        Ok(SearchHandle {
            shared,
            command_tx: Some(command_tx),
            driver_thread: Some(driver_thread),
            _parent_listener: parent_listener,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn run_search_driver(
    parent: &Arc<LogData>,
    regex: &Regex,
    config: &Config,
    shared: &Arc<SearchShared>,
    command_rx: mpsc::Receiver<DriverCommand>,
    auto_refresh: bool,
    mut cache_key: Option<CacheKey>,
    cache: &Arc<Mutex<Cache>>,
) {
    let mut next_line = run_pass(parent, regex, config, shared, 0, parent.line_count());

    if !shared.cancel.is_cancelled() && shared.last_error.lock_ignore_poison().is_none() {
        *shared.status.lock_ignore_poison() = Status::Done;
        if let Some(key) = cache_key.take() {
            cache.lock_ignore_poison().insert(key, shared.filtered.clone());
        }
    }

    if !auto_refresh {
        return;
    }

    for command in command_rx {
        if shared.cancel.is_cancelled() {
            break;
        }
        match command {
            DriverCommand::GrowTo(new_count) => {
                if new_count > next_line {
                    *shared.status.lock_ignore_poison() = Status::Running;
                    next_line = run_pass(parent, regex, config, shared, next_line, new_count);
                    if !shared.cancel.is_cancelled() && shared.last_error.lock_ignore_poison().is_none() {
                        *shared.status.lock_ignore_poison() = Status::Done;
                    }
                }
            }
            DriverCommand::Reset => {
                shared.filtered.reset();
                shared.bytes_searched.store(0, Ordering::Release);
                *shared.last_error.lock_ignore_poison() = None;
                *shared.status.lock_ignore_poison() = Status::Running;
                next_line = 0;
            }
            DriverCommand::Stop => break,
        }
    }

    if shared.cancel.is_cancelled() {
        *shared.status.lock_ignore_poison() = Status::Cancelled;
    }
}

/// Scans `[start, end)` of `parent` in batches across a worker pool, merging
/// results into `shared.filtered` in line-number order as each contiguous
/// batch completes. Returns the line number up to which the merge actually
/// advanced (may be less than `end` if an I/O error paused the pass).
fn run_pass(parent: &Arc<LogData>, regex: &Regex, config: &Config, shared: &Arc<SearchShared>, start: u64, end: u64) -> u64 {
    if start >= end {
        return start;
    }

    let batch_size = config.search_batch_size.max(1) as u64;
    let worker_count = config.search_worker_count.max(1);

    let mut queue = VecDeque::new();
    let mut id = 0u64;
    let mut cursor = start;
    while cursor < end {
        let batch_end = (cursor + batch_size).min(end);
        queue.push_back(BatchJob { id, start: cursor, end: batch_end });
        cursor = batch_end;
        id += 1;
    }
    let total_batches = queue.len() as u64;
    let queue = Arc::new(Mutex::new(queue));

    let pass_cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel::<BatchResult>();

    let workers: Vec<_> = (0..worker_count.min(total_batches.max(1) as usize))
        .map(|_| {
            let queue = queue.clone();
            let tx = tx.clone();
            let handle_cancel = shared.cancel.clone();
            let pass_cancel = pass_cancel.clone();
            let regex = regex.clone();
            let parent = parent.clone();
            spawn_named("klogg-search-worker", move || {
                loop {
                    if handle_cancel.is_cancelled() || pass_cancel.is_cancelled() {
                        break;
                    }
                    let batch = { queue.lock_ignore_poison().pop_front() };
                    let Some(batch) = batch else { break };

                    let mut matches = Vec::new();
                    let mut error = None;
                    for line in batch.start..batch.end {
                        if handle_cancel.is_cancelled() || pass_cancel.is_cancelled() {
                            break;
                        }
                        match parent.line_text(line) {
                            Ok(text) => {
                                if regex.is_match(&text) {
                                    matches.push(line);
                                }
                            }
                            Err(e) => {
                                error = Some(e.to_string());
                                pass_cancel.cancel();
                                break;
                            }
                        }
                    }
                    let done = error.is_none();
                    let _ = tx.send(BatchResult { id: batch.id, end: batch.end, matches, error });
                    if !done {
                        break;
                    }
                }
            })
        })
        .collect();
    drop(tx);

    let mut heap: BinaryHeap<std::cmp::Reverse<BatchResult>> = BinaryHeap::new();
    let mut next_id = 0u64;
    let mut merged_through = start;
    let mut pass_error = None;

    for result in rx {
        heap.push(std::cmp::Reverse(result));
        while let Some(std::cmp::Reverse(top)) = heap.peek() {
            if top.id != next_id {
                break;
            }
            let std::cmp::Reverse(r) = heap.pop().expect("peeked above");
            for line in &r.matches {
                shared.filtered.push(*line);
            }
            merged_through = r.end;
            if let Ok((_, end_offset)) = parent.line_byte_range(r.end.saturating_sub(1)) {
                shared.bytes_searched.store(end_offset, Ordering::Release);
            }
            if let Some(err) = r.error {
                pass_error = Some(err);
            }
            next_id += 1;
        }
    }

    for w in workers {
        let _ = w.join();
    }

    if let Some(err) = pass_error {
        *shared.last_error.lock_ignore_poison() = Some(err);
        *shared.status.lock_ignore_poison() = Status::Paused;
    }

    merged_through
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;
    use std::time::Duration;

    fn wait_for_status(handle: &SearchHandle, want: Status) -> SearchState {
        for _ in 0..200 {
            let state = handle.progress();
            if state.status == want {
                return state;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for status {want:?}, last state: {:?}", handle.progress());
    }

    fn lines_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn finds_all_matching_lines_in_order() {
        let f = lines_file(&["alpha", "ERROR one", "beta", "ERROR two", "gamma"]);
        let config = Config::shared();
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        for _ in 0..200 {
            if log.line_count() == 5 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(log.line_count(), 5);

        let engine = SearchEngine::new(config);
        let handle = engine.start(&log, "^ERROR", SearchOptions::default()).unwrap();
        let state = wait_for_status(&handle, Status::Done);
        assert_eq!(state.matches_count, 2);
        assert_eq!(handle.matches(0..10), vec![1, 3]);
    }

    #[test]
    fn cache_hit_returns_identical_filtered_index() {
        let f = lines_file(&["a", "MATCH", "b", "MATCH", "c"]);
        let config = Config::shared();
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        for _ in 0..200 {
            if log.line_count() == 5 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let engine = SearchEngine::new(config);
        let first = engine.start(&log, "MATCH", SearchOptions::default()).unwrap();
        wait_for_status(&first, Status::Done);

        let second = engine.start(&log, "MATCH", SearchOptions::default()).unwrap();
        assert_eq!(second.progress().status, Status::Done);
        assert_eq!(second.matches(0..10), first.matches(0..10));
    }

    #[test]
    fn cancel_returns_promptly_and_keeps_partial_results() {
        let many_lines: Vec<String> = (0..5000).map(|i| format!("line {i}")).collect();
        let refs: Vec<&str> = many_lines.iter().map(|s| s.as_str()).collect();
        let f = lines_file(&refs);
        let config = Arc::new(Config { search_worker_count: 1, search_batch_size: 2, ..(*Config::shared()).clone() });
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        for _ in 0..500 {
            if log.line_count() == 5000 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let engine = SearchEngine::new(config);
        let handle = engine.start(&log, "line", SearchOptions::default()).unwrap();
        handle.cancel();
        // Should not hang; drop joins the driver thread.
        drop(handle);
    }

    #[test]
    fn invalid_pattern_surfaces_synchronously() {
        let f = lines_file(&["a"]);
        let config = Config::shared();
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        let engine = SearchEngine::new(config);
        let err = engine.start(&log, "(unclosed", SearchOptions::default()).unwrap_err();
        assert!(matches!(err, KloggError::RegexCompileError(_)));
    }

    #[test]
    fn auto_refresh_extends_past_appends_and_clears_on_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"alpha\nERROR one\nbeta\n").unwrap();

        let config = Arc::new(Config { watch_poll_interval_ms: 20, watch_debounce_ms: 10, ..(*Config::shared()).clone() });
        let log = Arc::new(LogData::open(&path, config.clone()).unwrap());
        for _ in 0..200 {
            if log.line_count() == 3 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let engine = SearchEngine::new(config);
        let opts = SearchOptions { auto_refresh: true, ..SearchOptions::default() };
        let handle = engine.start(&log, "^ERROR", opts).unwrap();
        wait_for_status(&handle, Status::Done);
        assert_eq!(handle.progress().matches_count, 1);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"ERROR two\ngamma\n").unwrap();
        f.flush().unwrap();
        for _ in 0..200 {
            if handle.progress().matches_count == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.matches(0..10), vec![1, 3]);

        std::fs::write(&path, b"totally unrelated content\n").unwrap();
        for _ in 0..200 {
            if handle.progress().matches_count == 0 && log.line_count() == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(handle.progress().matches_count, 0);
    }

    #[test]
    fn extended_syntax_ignores_whitespace_and_comments() {
        let f = lines_file(&["alpha", "ERROR: one", "beta", "ERROR: two"]);
        let config = Config::shared();
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        for _ in 0..200 {
            if log.line_count() == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let engine = SearchEngine::new(config);
        let pattern = "^ E R R O R : # trailing comment, spaces above are insignificant\n";
        let opts = SearchOptions { extended: true, ..SearchOptions::default() };
        let handle = engine.start(&log, pattern, opts).unwrap();
        let state = wait_for_status(&handle, Status::Done);
        assert_eq!(state.matches_count, 2);
        assert_eq!(handle.matches(0..10), vec![1, 3]);
    }
}
