//! Runtime configuration, read from `~/.pitwall/config.toml`.
//!
//! Every field has a default, so a missing file (or a file with only some
//! sections) is valid.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PitwallConfig {
    #[serde(default)]
    pub season: SeasonConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeasonConfig {
    /// Explicit season label. When unset the label is derived from the
    /// calendar quarter, e.g. `2026-S4`.
    #[serde(default)]
    pub label: Option<String>,
}

impl SeasonConfig {
    pub fn resolve_label(&self, now: DateTime<Utc>) -> String {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => default_season_label(now),
        }
    }
}

pub fn default_season_label(now: DateTime<Utc>) -> String {
    let quarter = (now.month() - 1) / 3 + 1;
    format!("{}-S{}", now.year(), quarter)
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: default_event_queue_capacity(),
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// Window within which queued session updates coalesce into one delta.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            client_queue_capacity: default_client_queue_capacity(),
        }
    }
}

impl BroadcastConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms.max(1))
    }
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_save_interval_ms() -> u64 {
    5_000
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_snapshot_interval_ms() -> u64 {
    15_000
}

fn default_client_queue_capacity() -> usize {
    64
}

/// Loads configuration, returning defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<PitwallConfig, ConfigError> {
    if !path.exists() {
        return Ok(PitwallConfig::default());
    }

    let content = fs_err::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str::<PitwallConfig>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
