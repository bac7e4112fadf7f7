//! Store file management.
//!
//! ```text
//! <dir>/
//! ├─ whitelist.json        # The store document
//! ├─ whitelist.json.lock   # Advisory lock for single-writer
//! └─ whitelist.json.tmp    # Transient, only during a save
//! ```

use crate::error::{StoreError, StoreResult};
use crate::record::StoreDocument;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Owns the store document on disk and the lock guarding it.
///
/// Only one `StoreFile` can exist per document at a time, across processes.
#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    _lock_file: File,
}

impl StoreFile {
    /// Opens the document at `path`, acquiring its lock.
    ///
    /// The document itself need not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process holds the lock.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = sibling(path, "lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document from disk.
    ///
    /// A missing or empty file yields an empty document.
    pub fn load(&self) -> StoreResult<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }

        let data = fs::read(&self.path)?;
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(StoreDocument::default());
        }

        Ok(serde_json::from_slice(&data)?)
    }

    /// Writes the document atomically.
    ///
    /// Write-then-rename: the temp file is synced before it replaces the
    /// document, so a crash leaves either the old or the new version.
    pub fn save(&self, document: &StoreDocument) -> StoreResult<()> {
        let temp_path = sibling(&self.path, "tmp");

        let data = serde_json::to_vec_pretty(document)?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        self.sync_directory()?;

        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(extension);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::IdentityRecord;
    use tempfile::tempdir;
    use uuid::Uuid;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(&dir.path().join("whitelist.json")).unwrap();
        assert_eq!(file.load().unwrap(), StoreDocument::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        let file = StoreFile::open(&path).unwrap();

        let mut doc = StoreDocument::default();
        doc.users.insert(
            "42".into(),
            IdentityRecord {
                uuids: [Uuid::from_bytes([7; 16])].into_iter().collect(),
                ..Default::default()
            },
        );
        file.save(&doc).unwrap();

        assert_eq!(file.load().unwrap(), doc);
        assert!(!dir.path().join("whitelist.json.tmp").exists());

        // Pretty-printed
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"users\""));
    }

    #[test]
    fn second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        let _first = StoreFile::open(&path).unwrap();

        let second = StoreFile::open(&path);
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        {
            let _first = StoreFile::open(&path).unwrap();
        }
        assert!(StoreFile::open(&path).is_ok());
    }

    #[test]
    fn malformed_document_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("whitelist.json");
        fs::write(&path, "{ nope").unwrap();
        let file = StoreFile::open(&path).unwrap();
        assert!(matches!(file.load(), Err(StoreError::Malformed(_))));
    }
}
