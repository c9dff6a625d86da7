//! Local log store seam
//!
//! A chunk owns a [`LogStore`]: the local inverted index that makes its
//! spans searchable. Index internals (document insert, query execution,
//! segment merging) live behind this trait; the chunk pipeline only needs
//! to append, seal, and enumerate the sealed files for upload.
//!
//! [`JournalLogStore`] is the bundled implementation for development and
//! testing: an append-only JSON-lines journal with the same lifecycle as a
//! real index store.

use crate::span::Span;
use crate::{Error, Result};

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// The chunk-facing interface of a local index store.
///
/// Writes are only legal before `commit`; after the seal the store is a set
/// of immutable files under `data_directory`.
pub trait LogStore: Send + Sync {
    /// Append one span. Must be safe under concurrent callers.
    fn add_message(&self, span: &Span) -> Result<()>;

    /// Number of spans appended so far. Monotonically non-decreasing.
    fn message_count(&self) -> u64;

    /// Flush buffered state to local files and seal the store. Further
    /// appends fail.
    fn commit(&self) -> Result<()>;

    /// Directory holding the store's local files.
    fn data_directory(&self) -> &Path;

    /// The sealed files to upload. Only meaningful after `commit`.
    fn sealed_files(&self) -> Result<Vec<PathBuf>>;

    /// Release open resources. Does not delete files.
    fn close(&self) -> Result<()>;

    /// Delete the store's local files, after a successful upload.
    fn cleanup(&self) -> Result<()>;
}

const JOURNAL_FILE: &str = "spans.jsonl";

/// Append-only JSON-lines log store for development and tests.
pub struct JournalLogStore {
    dir: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    count: AtomicU64,
}

impl JournalLogStore {
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(JOURNAL_FILE))?;
        Ok(Self {
            dir,
            writer: Mutex::new(Some(BufWriter::new(file))),
            count: AtomicU64::new(0),
        })
    }
}

impl LogStore for JournalLogStore {
    fn add_message(&self, span: &Span) -> Result<()> {
        let line = serde_json::to_string(span)?;
        let mut guard = self.writer.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("journal store is sealed".to_string()))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn message_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn commit(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    fn data_directory(&self) -> &Path {
        &self.dir
    }

    fn sealed_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        if let Some(mut writer) = guard.take() {
            writer.flush()?;
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_then_seal_then_list_files() {
        let tmp = tempdir().unwrap();
        let store = JournalLogStore::create(tmp.path().join("chunk-1")).unwrap();

        store.add_message(&Span::new("s1", "svc", 10)).unwrap();
        store.add_message(&Span::new("s2", "svc", 20)).unwrap();
        assert_eq!(store.message_count(), 2);

        store.commit().unwrap();
        let files = store.sealed_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(JOURNAL_FILE));

        let contents = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_append_after_seal_fails() {
        let tmp = tempdir().unwrap();
        let store = JournalLogStore::create(tmp.path().join("chunk-2")).unwrap();
        store.commit().unwrap();

        let err = store.add_message(&Span::new("s", "svc", 0)).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(store.message_count(), 0);
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("chunk-3");
        let store = JournalLogStore::create(&dir).unwrap();
        store.add_message(&Span::new("s", "svc", 0)).unwrap();
        store.commit().unwrap();

        store.cleanup().unwrap();
        assert!(!dir.exists());
        // A second cleanup is a no-op
        store.cleanup().unwrap();
    }
}
