//! Runtime configuration for the storage core.
//!
//! Persisted as TOML, synchronously, against the same [`FileSystem`]
//! abstraction everything else in this crate uses — there's no async
//! runtime anywhere in the storage core, so config loading doesn't need
//! one either.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::fs::FileSystem;

/// Environment/flags recognized by the core (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Minimum age, in days, before an unreferenced image becomes eligible
    /// for GC deletion.
    pub grace_period_days: u32,
    /// GC reports what it would delete without deleting anything.
    pub dry_run: bool,
    /// Bypass SD-marker dev/prod safety checks. Test-mode only.
    pub skip_marker: bool,
    /// Whether this is a development build, combined with a marker to
    /// decide SD acceptance (§4.3).
    pub is_dev_build: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            grace_period_days: 14,
            dry_run: false,
            skip_marker: false,
            is_dev_build: false,
        }
    }
}

impl StoreConfig {
    /// Read and parse a config file.
    pub fn load_from(fs: &dyn FileSystem, path: &Path) -> StoreResult<Self> {
        let contents = fs.read_to_string(path)?;
        let config: StoreConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Read and parse a config file, falling back to [`StoreConfig::default`]
    /// if it doesn't exist or fails to parse.
    pub fn load_from_or_default(fs: &dyn FileSystem, path: &Path) -> Self {
        Self::load_from(fs, path).unwrap_or_default()
    }

    /// Serialize and write a config file, creating parent directories as
    /// needed.
    pub fn save_to(&self, fs: &dyn FileSystem, path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs.create_dir_all(parent)?;
            }
        }
        let contents = toml::to_string_pretty(self)?;
        fs.write(path, contents.as_bytes())
    }

    /// Default config file location, platform conventions permitting.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("notecove").join("store.toml"))
    }
}
