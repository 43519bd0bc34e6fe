//! Filesystem abstraction.
//!
//! [`FileSystem`] is the sole dependency every other storage-core component
//! has on the host OS. It exists so the move engine, discovery
//! reconciler, and image GC can be exercised against an
//! [`InMemoryFileSystem`] in tests without touching disk, while
//! [`RealFileSystem`] backs production use.
//!
//! Every operation returns a [`StoreError::Io`] carrying the path and a
//! coarse [`IoErrorKind`] rather than a bare `std::io::Error`, so callers
//! several layers up (e.g. the move engine's rollback path) can still say
//! which path failed.

mod native;

pub use native::RealFileSystem;

use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

pub mod events;
pub use events::StoreEvent;

#[cfg(test)]
mod memory;
#[cfg(test)]
pub use memory::InMemoryFileSystem;

/// Minimal stat information needed by the storage core (image GC's
/// `bytesReclaimed` accounting, the move engine's directory checks).
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    /// Size in bytes. Meaningless (0) for directories.
    pub size: u64,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Last-modified time, milliseconds since the Unix epoch, if known.
    pub modified_millis: Option<i64>,
}

/// Abstraction over filesystem operations.
///
/// `Send + Sync` so a host application may place an implementation behind
/// an `Arc` and share it across the components that need it.
pub trait FileSystem: Send + Sync {
    /// Create a directory and all missing parent directories.
    ///
    /// Idempotent: succeeds if the directory already exists.
    fn create_dir_all(&self, path: &Path) -> StoreResult<()>;

    /// Read an entire file's contents as bytes.
    fn read(&self, path: &Path) -> StoreResult<Vec<u8>>;

    /// Read an entire file's contents as a UTF-8 string.
    fn read_to_string(&self, path: &Path) -> StoreResult<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Format {
            offset: e.utf8_error().valid_up_to(),
            reason: format!("invalid UTF-8 in '{}'", path.display()),
        })
    }

    /// Overwrite (or create) a file with the given contents.
    fn write(&self, path: &Path, content: &[u8]) -> StoreResult<()>;

    /// Create a file only if it doesn't already exist. Used for the SD
    /// marker file, where a racing writer must never clobber another
    /// instance's marker.
    fn create_new(&self, path: &Path, content: &[u8]) -> StoreResult<()>;

    /// List the immediate children of a directory (not recursive).
    ///
    /// Returns an empty vector if the directory does not exist.
    fn list_dir(&self, path: &Path) -> StoreResult<Vec<PathBuf>>;

    /// Whether a path exists (file or directory).
    fn exists(&self, path: &Path) -> bool;

    /// Whether a path exists and is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Stat a path.
    fn stat(&self, path: &Path) -> StoreResult<FileStat>;

    /// Remove a single file.
    fn remove_file(&self, path: &Path) -> StoreResult<()>;

    /// Recursively remove a directory and everything under it.
    ///
    /// Idempotent: succeeds if the path does not exist.
    fn remove_dir_all(&self, path: &Path) -> StoreResult<()>;

    /// Rename/move `from` to `to`, assumed atomic when both paths are on
    /// the same volume (true for any rename within one SD). Creates `to`'s
    /// parent directory if needed.
    fn rename(&self, from: &Path, to: &Path) -> StoreResult<()>;

    /// Recursively copy every file under `from` into `to`, creating
    /// directories as needed. Used by the move engine's file-copy step
    /// (§4.7 step 3): copies use real reads, never a rename, so the
    /// source tree is left untouched until the caller explicitly deletes
    /// it.
    fn copy_tree(&self, from: &Path, to: &Path) -> StoreResult<()> {
        self.create_dir_all(to)?;
        for entry in self.list_dir(from)? {
            let name = match entry.file_name() {
                Some(n) => n,
                None => continue,
            };
            let dest = to.join(name);
            if self.is_dir(&entry) {
                self.copy_tree(&entry, &dest)?;
            } else {
                let bytes = self.read(&entry)?;
                self.write(&dest, &bytes)?;
            }
        }
        Ok(())
    }
}

// Blanket implementation for references, so components can take
// `impl FileSystem` or a concrete `&dyn FileSystem` interchangeably.
impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn create_dir_all(&self, path: &Path) -> StoreResult<()> {
        (**self).create_dir_all(path)
    }

    fn read(&self, path: &Path) -> StoreResult<Vec<u8>> {
        (**self).read(path)
    }

    fn write(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        (**self).write(path, content)
    }

    fn create_new(&self, path: &Path, content: &[u8]) -> StoreResult<()> {
        (**self).create_new(path, content)
    }

    fn list_dir(&self, path: &Path) -> StoreResult<Vec<PathBuf>> {
        (**self).list_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        (**self).is_dir(path)
    }

    fn stat(&self, path: &Path) -> StoreResult<FileStat> {
        (**self).stat(path)
    }

    fn remove_file(&self, path: &Path) -> StoreResult<()> {
        (**self).remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> StoreResult<()> {
        (**self).remove_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> StoreResult<()> {
        (**self).rename(from, to)
    }
}
