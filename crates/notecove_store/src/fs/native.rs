//! Native filesystem implementation, backed directly by `std::fs`.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use super::{FileStat, FileSystem};
use crate::error::{StoreError, StoreResult};

/// Thin wrapper over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn create_dir_all(&self, path: &Path) -> StoreResult<()> {
        fs::create_dir_all(path).map_err(|e| StoreError::io(path, e))
    }

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        fs::read(path).map_err(|e| StoreError::io(path, e))
    }

    fn write(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| StoreError::io(path, e))
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        // Atomic check: `create_new` prevents a racing writer from clobbering
        // a marker another instance just wrote.
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        file.write_all(content).map_err(|e| StoreError::io(path, e))
    }

    fn list_dir(&self, path: &Path) -> StoreResult<Vec<PathBuf>> {
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| StoreError::io(path, e))? {
            let entry = entry.map_err(|e| StoreError::io(path, e))?;
            files.push(entry.path());
        }
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn stat(&self, path: &Path) -> StoreResult<FileStat> {
        let meta = fs::metadata(path).map_err(|e| StoreError::io(path, e))?;
        let modified_millis = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64);
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            modified_millis,
        })
    }

    fn remove_file(&self, path: &Path) -> StoreResult<()> {
        fs::remove_file(path).map_err(|e| StoreError::io(path, e))
    }

    fn remove_dir_all(&self, path: &Path) -> StoreResult<()> {
        if !path.exists() {
            return Ok(());
        }
        fs::remove_dir_all(path).map_err(|e| StoreError::io(path, e))
    }

    fn rename(&self, from: &Path, to: &Path) -> StoreResult<()> {
        if !from.exists() {
            return Err(StoreError::Io {
                path: from.to_path_buf(),
                kind: crate::error::IoErrorKind::NotFound,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "rename source missing"),
            });
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        fs::rename(from, to).map_err(|e| StoreError::io(to, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("a/b/note.bin");
        fs.write(&path, b"hello").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"hello");
    }

    #[test]
    fn create_new_refuses_existing() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let path = dir.path().join("marker");
        fs.create_new(&path, b"first").unwrap();
        let err = fs.create_new(&path, b"second").unwrap_err();
        match err {
            StoreError::Io { kind, .. } => assert_eq!(kind, crate::error::IoErrorKind::Exists),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn remove_dir_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let missing = dir.path().join("does-not-exist");
        fs.remove_dir_all(&missing).unwrap();
    }

    #[test]
    fn rename_moves_across_directories() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let from = dir.path().join("src/file.bin");
        let to = dir.path().join("dst/nested/file.bin");
        fs.write(&from, b"payload").unwrap();
        fs.rename(&from, &to).unwrap();
        assert!(!fs.exists(&from));
        assert_eq!(fs.read(&to).unwrap(), b"payload");
    }

    #[test]
    fn list_dir_on_missing_path_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RealFileSystem;
        let missing = dir.path().join("nope");
        assert!(fs.list_dir(&missing).unwrap().is_empty());
    }
}
