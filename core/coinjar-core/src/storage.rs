//! Storage paths for Coin Jar data.
//!
//! Everything lives under one root (default `~/.coinjar`):
//!
//! ```text
//! ~/.coinjar/
//! ├── config.toml
//! ├── state/        # persisted resource snapshots, one JSON file per key
//! └── logs/         # rolling debug logs (CLI only)
//! ```
//!
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

use crate::error::{JarError, Result};

pub const HOME_ENV: &str = "COINJAR_HOME";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the root from `COINJAR_HOME`, falling back to `~/.coinjar`.
    pub fn discover() -> Result<Self> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(JarError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(".coinjar")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// File backing one persisted key. Keys are fixed identifiers, so they are
    /// used as file stems directly.
    pub fn snapshot_file(&self, key: &str) -> PathBuf {
        self.state_dir().join(format!("{}.json", key))
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs_err::create_dir_all(&self.root)?;
        fs_err::create_dir_all(self.state_dir())?;
        fs_err::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
