//! Byte Source — abstraction over a local file: random-access reads, current
//! size, content fingerprint, change signal.
//!
//! Grounded on the read/seek patterns shared by `ByteSeekBackend` and
//! `LineIndexBackend` in the teacher's file-viewer backends, generalized
//! behind a trait so the indexer, log data, and tests can all depend on an
//! injected `ByteSource` rather than a concrete `File`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::KloggError;
use crate::file_id::FileId;

/// Random-access read interface the indexer and log data consume.
pub trait ByteSource: Send + Sync {
    /// Reads up to `len` bytes starting at `offset`. Short reads at EOF are
    /// returned as a shorter-than-`len` vector, not an error.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, KloggError>;

    /// Current size in bytes.
    fn size(&self) -> Result<u64, KloggError>;

    /// Content fingerprint used for rotation detection.
    fn fingerprint(&self, sample_bytes: usize) -> Result<FileId, KloggError>;
}

/// A `ByteSource` backed by a path on the local filesystem. Each call opens
/// its own file handle — there is no shared cursor to synchronize across
/// concurrent readers (the indexer and line-text reads never share a `File`).
pub struct FileByteSource {
    path: PathBuf,
}

impl FileByteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for FileByteSource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, KloggError> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut total_read = 0;
        loop {
            let n = file.read(&mut buf[total_read..])?;
            if n == 0 {
                break;
            }
            total_read += n;
            if total_read == buf.len() {
                break;
            }
        }
        buf.truncate(total_read);
        Ok(buf)
    }

    fn size(&self) -> Result<u64, KloggError> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn fingerprint(&self, sample_bytes: usize) -> Result<FileId, KloggError> {
        FileId::compute(&self.path, sample_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_at_returns_requested_slice() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"0123456789").unwrap();
        f.flush().unwrap();
        let source = FileByteSource::new(f.path());
        assert_eq!(source.read_at(3, 4).unwrap(), b"3456");
    }

    #[test]
    fn read_at_past_eof_short_reads() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();
        let source = FileByteSource::new(f.path());
        assert_eq!(source.read_at(1, 100).unwrap(), b"bc");
    }

    #[test]
    fn size_matches_file_length() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello").unwrap();
        f.flush().unwrap();
        let source = FileByteSource::new(f.path());
        assert_eq!(source.size().unwrap(), 5);
    }

    #[test]
    fn missing_file_surfaces_source_unavailable() {
        let source = FileByteSource::new("/nonexistent/klogg-test-path");
        assert!(matches!(source.size().unwrap_err(), KloggError::SourceUnavailable(_)));
    }
}
