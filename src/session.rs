//! Session snapshot persistence — the core's only concession to the shell's
//! session/recent-files concept. Per `spec.md` §(persisted state layout): "the
//! core only takes a configuration struct and returns serializable snapshots
//! of search history and recent files"; the shell owns actually restoring a
//! window layout from one.
//!
//! Grounded on `settings::legacy::Settings`, the teacher's own plain
//! `serde`-derived struct read from / written to a JSON file on disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KloggError;

/// A serializable record of what was open, suitable for a shell to restore
/// (or for this CLI's `--load-session` to print back). The core never
/// interprets this beyond read/write; it has no notion of window layout.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    pub recent_files: Vec<PathBuf>,
    pub search_history: Vec<String>,
}

impl SessionSnapshot {
    pub fn save(&self, path: &Path) -> Result<(), KloggError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| KloggError::InternalConsistency(format!("session snapshot did not serialize: {e}")))?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, KloggError> {
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| KloggError::DecodeError(format!("malformed session file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let snapshot = SessionSnapshot {
            recent_files: vec![PathBuf::from("/var/log/syslog")],
            search_history: vec!["^ERROR".to_string()],
        };
        snapshot.save(&path).unwrap();
        let loaded = SessionSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn missing_file_surfaces_source_unavailable() {
        let err = SessionSnapshot::load(Path::new("/nonexistent/session.json")).unwrap_err();
        assert!(matches!(err, KloggError::SourceUnavailable(_)));
    }
}
