//! Error types for pitwall-core operations.

use std::path::PathBuf;

use pitwall_protocol::{ErrorInfo, RewardSlot};

// ═══════════════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The stats file exists but is not a valid stats document. Not reset
    /// automatically; the operator decides whether to move it aside.
    #[error("Stats file is corrupt: {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stats file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Failed to serialize stats: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            context: context.into(),
            source,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Rewards
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RewardError {
    #[error("Unknown reward: {0}")]
    UnknownReward(String),

    #[error("Reward not unlocked yet: {0}")]
    NotUnlocked(String),

    #[error("Invalid reward slot: {0}")]
    InvalidSlot(String),

    #[error("Reward {reward} belongs in slot {expected}, not {slot}")]
    SlotMismatch {
        reward: String,
        slot: RewardSlot,
        expected: RewardSlot,
    },
}

impl RewardError {
    pub fn code(&self) -> &'static str {
        match self {
            RewardError::UnknownReward(_) => "unknown_reward",
            RewardError::NotUnlocked(_) => "not_unlocked",
            RewardError::InvalidSlot(_) => "invalid_slot",
            RewardError::SlotMismatch { .. } => "slot_mismatch",
        }
    }
}

impl From<RewardError> for ErrorInfo {
    fn from(err: RewardError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Event queue
// ═══════════════════════════════════════════════════════════════════════════════

/// The stats tracker has shut down and no longer accepts events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Event queue closed")]
pub struct QueueClosed;

// ═══════════════════════════════════════════════════════════════════════════════
// Broadcast clients
// ═══════════════════════════════════════════════════════════════════════════════

/// A client's outbound sink failed; the client is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Client disconnected")]
    Closed,

    #[error("Client write failed: {0}")]
    Io(#[from] std::io::Error),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Umbrella
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors that can surface from pitwall-core.
#[derive(Debug, thiserror::Error)]
pub enum PitwallError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Reward(#[from] RewardError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    #[error("Home directory not found")]
    HomeDirNotFound,
}

/// Convenience type alias for Results using PitwallError.
pub type Result<T> = std::result::Result<T, PitwallError>;
