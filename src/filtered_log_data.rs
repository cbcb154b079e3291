//! Filtered Log Data — a `LogDataView` over a subset of a parent's lines,
//! selected by a `FilteredIndex`.
//!
//! Grounded on the same `FileViewerBackend` delegation shape `LogData` uses,
//! per the design note in `SPEC_FULL.md` §9: rather than a `FilteredLogData`
//! subclassing `LogData` (the original's C++ inheritance), this holds a weak
//! reference to the parent and an owned `FilteredIndex`, delegating every
//! read through the remapping `filtered_index[i] -> parent line`.

use std::sync::{Arc, Weak};

use crate::error::KloggError;
use crate::ignore_poison::IgnorePoison;
use crate::log_data::{ListenerRegistration, LogData, LogDataView, Listener};
use crate::search::FilteredIndex;

/// A view over a subset of a parent `LogData`'s lines. Holds a weak
/// reference to the parent (per `SPEC_FULL.md` §3's ownership model: parents
/// never keep children alive) and a strong reference to the `FilteredIndex`
/// a `SearchHandle` is still writing into.
pub struct FilteredLogData {
    parent: Weak<LogData>,
    filtered: Arc<FilteredIndex>,
}

impl FilteredLogData {
    pub fn new(parent: &Arc<LogData>, filtered: Arc<FilteredIndex>) -> Self {
        Self { parent: Arc::downgrade(parent), filtered }
    }

    fn parent(&self) -> Result<Arc<LogData>, KloggError> {
        self.parent.upgrade().ok_or_else(|| KloggError::SourceUnavailable("parent log data was dropped".into()))
    }

    /// The line number in the parent's address space that corresponds to
    /// filtered line `i`, if `i` is currently in range.
    pub fn source_line(&self, i: u64) -> Option<u64> {
        self.filtered.get(i)
    }
}

impl LogDataView for FilteredLogData {
    fn line_count(&self) -> u64 {
        self.filtered.len()
    }

    fn line_byte_range(&self, line: u64) -> Result<(u64, u64), KloggError> {
        let source_line = self.filtered.get(line).ok_or_else(|| {
            KloggError::InternalConsistency(format!(
                "line_byte_range({line}) out of range (filtered line_count = {})",
                self.filtered.len()
            ))
        })?;
        self.parent()?.line_byte_range(source_line)
    }

    fn line_text(&self, line: u64) -> Result<String, KloggError> {
        let source_line = self.filtered.get(line).ok_or_else(|| {
            KloggError::InternalConsistency(format!(
                "line_text({line}) out of range (filtered line_count = {})",
                self.filtered.len()
            ))
        })?;
        self.parent()?.line_text(source_line)
    }

    fn attach_listener(&self, listener: Listener) -> ListenerRegistration {
        // Remap the parent's events through unchanged (rotation/progress are
        // structural signals the consumer still needs; line numbers named
        // inside `IndexProgress` are parent-space already).
        match self.parent() {
            Ok(parent) => parent.attach_listener(listener),
            Err(_) => {
                // Parent is gone; return a registration over a throwaway list
                // so callers can still drop it without special-casing.
                let listeners = Arc::new(std::sync::Mutex::new(Vec::new()));
                listeners.lock_ignore_poison().push((0, listener));
                ListenerRegistration::detached(listeners, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::search::{SearchEngine, SearchOptions, Status};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn delegates_line_text_through_the_filtered_index() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "alpha").unwrap();
        writeln!(f, "ERROR one").unwrap();
        writeln!(f, "beta").unwrap();
        writeln!(f, "ERROR two").unwrap();
        f.flush().unwrap();

        let config = Config::shared();
        let log = Arc::new(LogData::open(f.path(), config.clone()).unwrap());
        for _ in 0..200 {
            if log.line_count() == 4 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let engine = SearchEngine::new(config);
        let handle = engine.start(&log, "^ERROR", SearchOptions::default()).unwrap();
        for _ in 0..200 {
            if handle.progress().status == Status::Done {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        let view = FilteredLogData::new(&log, handle.filtered_index());
        assert_eq!(view.line_count(), 2);
        assert_eq!(view.line_text(0).unwrap(), "ERROR one");
        assert_eq!(view.line_text(1).unwrap(), "ERROR two");
        assert_eq!(view.source_line(1), Some(3));
    }
}
