//! Storage configuration and path management for pitwall.
//!
//! All on-disk locations are decided here so the daemon and tests agree on
//! layout. Production code uses [`StorageConfig::discover`] which points to
//! `~/.pitwall/`; tests use [`StorageConfig::with_root`] for isolation.

use std::path::{Path, PathBuf};

use crate::error::{PitwallError, Result};

const ROOT_DIR_NAME: &str = ".pitwall";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all pitwall data (default: ~/.pitwall)
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the per-user state directory.
    pub fn discover() -> Result<Self> {
        let home = dirs::home_dir().ok_or(PitwallError::HomeDirNotFound)?;
        Ok(Self {
            root: home.join(ROOT_DIR_NAME),
        })
    }

    /// Creates a StorageConfig with a custom root directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to stats.json (persisted aggregate stats).
    pub fn stats_file(&self) -> PathBuf {
        self.root.join("stats.json")
    }

    /// Path to config.toml (runtime configuration).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Path to the daemon's Unix socket.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    /// Ensures the root directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs_err::create_dir_all(&self.root)
    }
}
