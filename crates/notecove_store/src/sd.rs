//! Sync Directory layout and marker lifecycle.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{IoErrorKind, StoreError, StoreResult};
use crate::fs::FileSystem;

const MARKER_FILE_NAME: &str = ".notecove-sd-marker";

/// Which build wrote an SD's marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdType {
    Dev,
    Prod,
}

impl SdType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            SdType::Dev => b"dev",
            SdType::Prod => b"prod",
        }
    }
}

impl fmt::Display for SdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdType::Dev => write!(f, "dev"),
            SdType::Prod => write!(f, "prod"),
        }
    }
}

/// What [`read_sd_marker`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Dev,
    Prod,
    None,
}

fn notes_dir(sd: &Path) -> PathBuf {
    sd.join("notes")
}

fn folders_logs_dir(sd: &Path) -> PathBuf {
    sd.join("folders").join("logs")
}

fn deletions_dir(sd: &Path) -> PathBuf {
    sd.join("deletions")
}

fn activity_dir(sd: &Path) -> PathBuf {
    sd.join("activity")
}

fn media_dir(sd: &Path) -> PathBuf {
    sd.join("media")
}

fn marker_path(sd: &Path) -> PathBuf {
    sd.join(MARKER_FILE_NAME)
}

/// Idempotently create the canonical SD layout. Safe to call on a
/// populated SD — every directory is created with `create_dir_all`.
pub fn initialize(fs: &dyn FileSystem, sd: &Path) -> StoreResult<()> {
    fs.create_dir_all(sd)?;
    fs.create_dir_all(&notes_dir(sd))?;
    fs.create_dir_all(&folders_logs_dir(sd))?;
    fs.create_dir_all(&deletions_dir(sd))?;
    fs.create_dir_all(&activity_dir(sd))?;
    fs.create_dir_all(&media_dir(sd))?;
    Ok(())
}

/// Read the SD marker file, if any.
pub fn read_sd_marker(fs: &dyn FileSystem, sd: &Path) -> StoreResult<MarkerState> {
    let path = marker_path(sd);
    if !fs.exists(&path) {
        return Ok(MarkerState::None);
    }
    let contents = fs.read_to_string(&path)?;
    Ok(match contents.trim() {
        "dev" => MarkerState::Dev,
        "prod" => MarkerState::Prod,
        _ => MarkerState::None,
    })
}

/// Write the marker if absent. Never overwrites a marker that already
/// names a different type — the marker records which build *first*
/// touched this SD, and `ensure_marker` is not a migration tool.
///
/// Uses `create_new` rather than an `exists` check followed by `write`: two
/// instances racing to initialize the same SD must never have the second
/// clobber the first's marker.
pub fn ensure_marker(fs: &dyn FileSystem, sd: &Path, current_type: SdType) -> StoreResult<()> {
    let path = marker_path(sd);
    match fs.create_new(&path, current_type.as_bytes()) {
        Ok(()) => Ok(()),
        Err(StoreError::Io { kind: IoErrorKind::Exists, .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Outcome of [`check_marker_safety`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSafety {
    /// SD may be registered; marker now matches `current_type` if it was
    /// previously absent.
    Accepted,
    /// SD must be skipped: a prod build found a dev marker.
    Refused,
}

/// Apply the dev/prod safety policy on SD load (§4.3).
///
/// If `skip_marker` is set (test mode), the check is bypassed entirely and
/// the marker is written if missing, without a dev/prod comparison.
pub fn check_marker_safety(
    fs: &dyn FileSystem,
    sd: &Path,
    current_type: SdType,
    skip_marker: bool,
) -> StoreResult<MarkerSafety> {
    if skip_marker {
        ensure_marker(fs, sd, current_type)?;
        return Ok(MarkerSafety::Accepted);
    }

    match read_sd_marker(fs, sd)? {
        MarkerState::None => {
            ensure_marker(fs, sd, current_type)?;
            Ok(MarkerSafety::Accepted)
        }
        MarkerState::Dev if current_type == SdType::Prod => {
            log::warn!(
                "refusing to register SD at {}: prod build found dev marker",
                sd.display()
            );
            Ok(MarkerSafety::Refused)
        }
        MarkerState::Dev | MarkerState::Prod => Ok(MarkerSafety::Accepted),
    }
}
