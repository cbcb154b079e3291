//! Error kinds shared across the core data plane.
//!
//! Mirrors the manual enum + `Display` + `From<io::Error>` idiom used throughout
//! this crate's backends rather than a derive-macro error crate.

use std::fmt;

/// Errors surfaced by the core components to their callers.
///
/// `InternalConsistency` is reserved for violated invariants (e.g. `Store::at`
/// called out of range) and is not meant to be handled — callers that see it
/// should let the process crash with the diagnostic attached.
#[derive(Debug, Clone)]
pub enum KloggError {
    /// File missing or locked on open.
    SourceUnavailable(String),
    /// Transient I/O failure mid-indexing or mid-search.
    SourceReadError(String),
    /// Fingerprint change detected; downstream views must reset.
    SourceRotated,
    /// Malformed bytes under the chosen encoding. Never fatal.
    DecodeError(String),
    /// Pattern failed to compile.
    RegexCompileError(String),
    /// A task observed its cancel flag.
    Cancelled,
    /// Violated invariant. Fatal.
    InternalConsistency(String),
}

impl fmt::Display for KloggError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable(msg) => write!(f, "source unavailable: {msg}"),
            Self::SourceReadError(msg) => write!(f, "read error: {msg}"),
            Self::SourceRotated => write!(f, "source rotated"),
            Self::DecodeError(msg) => write!(f, "decode error: {msg}"),
            Self::RegexCompileError(msg) => write!(f, "regex compile error: {msg}"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::InternalConsistency(msg) => write!(f, "internal consistency violation: {msg}"),
        }
    }
}

impl std::error::Error for KloggError {}

impl From<std::io::Error> for KloggError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::SourceUnavailable(e.to_string())
            }
            _ => Self::SourceReadError(e.to_string()),
        }
    }
}

impl From<regex::Error> for KloggError {
    fn from(e: regex::Error) -> Self {
        Self::RegexCompileError(e.to_string())
    }
}
