//! Versioned, crash-safe persistence of the [`Stats`] document (`stats.json`).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::PersistenceError;
use crate::stats::{Stats, STATS_VERSION};

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct PersistenceStore {
    path: PathBuf,
}

impl PersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stats document.
    ///
    /// A missing file yields empty stats. A file that exists but does not parse
    /// is an error; it is left in place untouched.
    pub fn load(&self) -> Result<Stats, PersistenceError> {
        let content = match fs_err::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Stats::default());
            }
            Err(err) => return Err(PersistenceError::io("reading stats file", err)),
        };

        let corrupt = |source| PersistenceError::Corrupt {
            path: self.path.clone(),
            source,
        };

        let header: VersionHeader = serde_json::from_str(&content).map_err(corrupt)?;
        if let Some(found) = header.version {
            if found > STATS_VERSION {
                return Err(PersistenceError::UnsupportedVersion {
                    found,
                    supported: STATS_VERSION,
                });
            }
        }

        let mut stats: Stats = serde_json::from_str(&content).map_err(corrupt)?;
        stats.version = STATS_VERSION;
        Ok(stats)
    }

    /// Loads the stats and moves the battle pass to `season`, archiving the
    /// previous season if the label changed.
    pub fn load_season(&self, season: &str, now: DateTime<Utc>) -> Result<Stats, PersistenceError> {
        let mut stats = self.load()?;
        let previous = stats.battle_pass.season.clone();
        if stats.rotate_season(season, now) {
            tracing::info!(
                from = %previous,
                to = %season,
                archived = stats.season_archive.len(),
                "Rotated battle pass season"
            );
        }
        Ok(stats)
    }

    /// Writes the stats atomically: temp file in the same directory, fsync,
    /// then rename over the target.
    pub fn save(&self, stats: &Stats) -> Result<(), PersistenceError> {
        let content = serde_json::to_string_pretty(stats).map_err(PersistenceError::Serialize)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs_err::create_dir_all(dir)
            .map_err(|e| PersistenceError::io(format!("creating {}", dir.display()), e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| {
            PersistenceError::io(format!("creating temp file in {}", dir.display()), e)
        })?;

        tmp.write_all(content.as_bytes()).map_err(|e| {
            PersistenceError::io(format!("writing temp file for {}", self.path.display()), e)
        })?;

        tmp.flush().map_err(|e| {
            PersistenceError::io(format!("flushing temp file for {}", self.path.display()), e)
        })?;

        tmp.as_file().sync_all().map_err(|e| {
            PersistenceError::io(format!("syncing temp file for {}", self.path.display()), e)
        })?;

        tmp.persist(&self.path).map_err(|e| {
            PersistenceError::io(format!("persisting temp file to {}", self.path.display()), e.error)
        })?;

        Ok(())
    }
}
