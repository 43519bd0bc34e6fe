//! In-memory [`FileSystem`] for unit tests, used by the discovery reconciler
//! discovery, move engine, and image GC test suites so they can drive
//! crash-recovery and concurrency scenarios without touching disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{FileStat, FileSystem};
use crate::error::{IoErrorKind, StoreError, StoreResult};

#[derive(Debug, Clone)]
enum Entry {
    File(Vec<u8>),
    Dir,
}

/// A filesystem held entirely in memory, behind a single [`Mutex`].
///
/// Parent directories are tracked explicitly (an `Entry::Dir` per ancestor)
/// so `is_dir`/`list_dir` behave the way a real filesystem would even
/// though no actual directory entries exist on disk.
#[derive(Debug, Default)]
pub struct InMemoryFileSystem {
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(path: &Path) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            kind: IoErrorKind::NotFound,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        }
    }

    fn insert_ancestors(entries: &mut HashMap<PathBuf, Entry>, path: &Path) {
        let mut current = path;
        while let Some(parent) = current.parent() {
            if parent.as_os_str().is_empty() {
                break;
            }
            entries
                .entry(parent.to_path_buf())
                .or_insert(Entry::Dir);
            current = parent;
        }
    }
}

impl FileSystem for InMemoryFileSystem {
    fn create_dir_all(&self, path: &Path) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(path.to_path_buf(), Entry::Dir);
        Self::insert_ancestors(&mut entries, path);
        Ok(())
    }

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(Entry::File(bytes)) => Ok(bytes.clone()),
            Some(Entry::Dir) => Err(StoreError::Io {
                path: path.to_path_buf(),
                kind: IoErrorKind::Io,
                source: std::io::Error::new(std::io::ErrorKind::Other, "is a directory"),
            }),
            None => Err(Self::not_found(path)),
        }
    }

    fn write(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(path.to_path_buf(), Entry::File(content.to_vec()));
        Self::insert_ancestors(&mut entries, path);
        Ok(())
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(path) {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                kind: IoErrorKind::Exists,
                source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "already exists"),
            });
        }
        entries.insert(path.to_path_buf(), Entry::File(content.to_vec()));
        Self::insert_ancestors(&mut entries, path);
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> StoreResult<Vec<PathBuf>> {
        let entries = self.entries.lock().unwrap();
        let mut out: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().unwrap().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.lock().unwrap().get(path), Some(Entry::Dir))
    }

    fn stat(&self, path: &Path) -> StoreResult<FileStat> {
        let entries = self.entries.lock().unwrap();
        match entries.get(path) {
            Some(Entry::File(bytes)) => Ok(FileStat {
                size: bytes.len() as u64,
                is_dir: false,
                modified_millis: None,
            }),
            Some(Entry::Dir) => Ok(FileStat {
                size: 0,
                is_dir: true,
                modified_millis: None,
            }),
            None => Err(Self::not_found(path)),
        }
    }

    fn remove_file(&self, path: &Path) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.remove(path) {
            Some(Entry::File(_)) => Ok(()),
            Some(Entry::Dir) => {
                entries.insert(path.to_path_buf(), Entry::Dir);
                Err(StoreError::Io {
                    path: path.to_path_buf(),
                    kind: IoErrorKind::Io,
                    source: std::io::Error::new(std::io::ErrorKind::Other, "is a directory"),
                })
            }
            None => Err(Self::not_found(path)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|p, _| p != path && !p.starts_with(path));
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(from) {
            return Err(Self::not_found(from));
        }

        let to_move: Vec<(PathBuf, Entry)> = entries
            .iter()
            .filter(|(p, _)| *p == from || p.starts_with(from))
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect();

        for (p, entry) in to_move {
            entries.remove(&p);
            let rel = p.strip_prefix(from).unwrap_or(Path::new(""));
            let dest = if rel.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rel)
            };
            entries.insert(dest, entry);
        }
        Self::insert_ancestors(&mut entries, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_roundtrips() {
        let fs = InMemoryFileSystem::new();
        let path = PathBuf::from("/sd/notes/a.bin");
        fs.write(&path, b"hi").unwrap();
        assert_eq!(fs.read(&path).unwrap(), b"hi");
        assert!(fs.exists(Path::new("/sd/notes")));
        assert!(fs.is_dir(Path::new("/sd/notes")));
    }

    #[test]
    fn create_new_refuses_existing() {
        let fs = InMemoryFileSystem::new();
        let path = PathBuf::from("/sd/.marker");
        fs.create_new(&path, b"x").unwrap();
        let err = fs.create_new(&path, b"y").unwrap_err();
        assert!(matches!(err, StoreError::Io { kind: IoErrorKind::Exists, .. }));
    }

    #[test]
    fn rename_moves_a_subtree() {
        let fs = InMemoryFileSystem::new();
        fs.write(Path::new("/sd/notes/abc/log.bin"), b"1").unwrap();
        fs.write(Path::new("/sd/notes/abc/snap.bin"), b"2").unwrap();
        fs.rename(Path::new("/sd/notes/abc"), Path::new("/sd2/notes/abc"))
            .unwrap();
        assert!(!fs.exists(Path::new("/sd/notes/abc/log.bin")));
        assert_eq!(fs.read(Path::new("/sd2/notes/abc/log.bin")).unwrap(), b"1");
        assert_eq!(fs.read(Path::new("/sd2/notes/abc/snap.bin")).unwrap(), b"2");
    }

    #[test]
    fn remove_dir_all_removes_subtree_only() {
        let fs = InMemoryFileSystem::new();
        fs.write(Path::new("/sd/notes/a/x.bin"), b"1").unwrap();
        fs.write(Path::new("/sd/notes/b/y.bin"), b"2").unwrap();
        fs.remove_dir_all(Path::new("/sd/notes/a")).unwrap();
        assert!(!fs.exists(Path::new("/sd/notes/a/x.bin")));
        assert!(fs.exists(Path::new("/sd/notes/b/y.bin")));
    }

    #[test]
    fn copy_tree_leaves_source_in_place() {
        let fs = InMemoryFileSystem::new();
        fs.write(Path::new("/sd/notes/abc/log.bin"), b"1").unwrap();
        fs.copy_tree(Path::new("/sd/notes/abc"), Path::new("/sd2/notes/abc"))
            .unwrap();
        assert_eq!(fs.read(Path::new("/sd/notes/abc/log.bin")).unwrap(), b"1");
        assert_eq!(fs.read(Path::new("/sd2/notes/abc/log.bin")).unwrap(), b"1");
    }
}
