//! FileId — identity of a concrete on-disk file across renames.
//!
//! Two files are the same `FileId` iff device, inode, and a content fingerprint
//! of their first N bytes all match. Grounded on glogg's `FileDigest`
//! (`original_source/src/logdata/src/filedigest.cpp`), which wraps an XXH64
//! streaming hash; this crate uses `xxhash-rust`'s XXH3 variant, the
//! corpus-grounded choice (seen in `other_examples/manifests/fjall-rs-lsm-tree`)
//! for a fast non-cryptographic content fingerprint.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use xxhash_rust::xxh3::Xxh3;

use crate::error::KloggError;

/// Identity of a file on disk, stable across append/truncate but distinct
/// across rotation (replace-with-different-content).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    device: u64,
    inode: u64,
    prefix_hash: u64,
}

impl FileId {
    /// Computes the identity of the file at `path`, hashing up to
    /// `sample_bytes` from the start of the file.
    ///
    /// This is a point-in-time snapshot: for a file shorter than
    /// `sample_bytes`, `prefix_hash` covers whatever currently exists and so
    /// changes as the file grows. Code that needs to tell an append apart
    /// from a rotation across two points in time (the watcher) must compare
    /// a length-matched window itself rather than two `FileId`s taken at
    /// different sizes — see `watcher::WatchState`.
    pub fn compute(path: &Path, sample_bytes: usize) -> Result<Self, KloggError> {
        let mut file = File::open(path)?;
        let metadata = file.metadata()?;
        let (device, inode) = metadata_ids(&metadata);
        let prefix = read_prefix_from(&mut file, sample_bytes)?;
        Ok(Self { device, inode, prefix_hash: hash_bytes(&prefix) })
    }
}

/// Device/inode pair (or the nearest cross-platform equivalent) from an
/// already-fetched `Metadata`. Shared by `FileId::compute` and the watcher,
/// which fetches `Metadata` anyway to read the file's current size.
#[cfg(unix)]
pub(crate) fn metadata_ids(metadata: &fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
pub(crate) fn metadata_ids(metadata: &fs::Metadata) -> (u64, u64) {
    // No stable device/inode pair on this platform; fall back to file length
    // and creation time, which still distinguishes unrelated files sharing a path.
    use std::os::windows::fs::MetadataExt;
    (metadata.file_size(), metadata.creation_time())
}

/// Reads up to `max_len` bytes from the start of the file at `path`. Used by
/// the watcher to re-hash a specific, previously-hashed byte range rather
/// than whatever currently fits in `max_len`.
pub(crate) fn read_prefix(path: &Path, max_len: usize) -> Result<Vec<u8>, KloggError> {
    let mut file = File::open(path)?;
    read_prefix_from(&mut file, max_len)
}

fn read_prefix_from(file: &mut File, max_len: usize) -> Result<Vec<u8>, KloggError> {
    let mut buf = vec![0u8; max_len];
    let mut total_read = 0usize;
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

/// Hashes a byte slice with the same fast fingerprint `FileId` uses for its
/// content prefix.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(bytes);
    hasher.digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn same_content_same_path_yields_same_id() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello world").unwrap();
        f.flush().unwrap();
        let a = FileId::compute(f.path(), 64 * 1024).unwrap();
        let b = FileId::compute(f.path(), 64 * 1024).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_yields_different_id() {
        let mut f1 = tempfile::NamedTempFile::new().unwrap();
        f1.write_all(b"one").unwrap();
        f1.flush().unwrap();
        let mut f2 = tempfile::NamedTempFile::new().unwrap();
        f2.write_all(b"two").unwrap();
        f2.flush().unwrap();
        let a = FileId::compute(f1.path(), 64 * 1024).unwrap();
        let b = FileId::compute(f2.path(), 64 * 1024).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_file_is_source_unavailable() {
        let err = FileId::compute(Path::new("/nonexistent/path/klogg-test"), 1024).unwrap_err();
        assert!(matches!(err, KloggError::SourceUnavailable(_)));
    }
}
