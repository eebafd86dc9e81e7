//! IPC and broadcast protocol types for pitwall.
//!
//! This crate is shared by the daemon, the monitor that feeds it, and the
//! dashboard clients so the schema cannot drift between them. The daemon
//! remains the authority on validation, but clients can reuse the same types
//! to construct valid requests.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod session;
pub mod wire;

pub use session::{Activity, SessionState, SourceHealth, SourceStatus, SubagentState};
pub use wire::{
    AchievementPayload, AchievementTier, BattlePassProgressPayload, ClientMessage,
    CompletionPayload, DeltaPayload, EquippedPayload, ErrorPayload, Frame, RewardInfo,
    RewardSlot, ServerMessage, SnapshotPayload, SourceHealthPayload, XpGrant,
};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    GetSessions,
    GetStats,
    GetAchievements,
    GetChallenges,
    Equip,
    Unequip,
    PushSessions,
    RemoveSessions,
    PushEvent,
    SetSourceHealth,
    /// Keeps the connection open and streams broadcast frames, one per line.
    Subscribe,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EquipParams {
    pub reward_id: String,
    pub slot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UnequipParams {
    pub slot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PushSessionsParams {
    pub sessions: Vec<SessionState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoveSessionsParams {
    pub session_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceHealthParams {
    pub sources: Vec<SourceHealth>,
}

/// Deserializes request params, mapping failures to `invalid_params`.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "params are required"))?;
    serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))
}

/// Validates a monitor-supplied session snapshot before it reaches the store.
pub fn validate_session(state: &SessionState) -> Result<(), ErrorInfo> {
    require_string(&state.id, "id")?;
    if state.id.len() > MAX_SESSION_ID_LEN {
        return Err(ErrorInfo::new(
            "invalid_session_id",
            format!("id must be {} characters or fewer", MAX_SESSION_ID_LEN),
        ));
    }
    if !state.context_utilization.is_finite() || state.context_utilization < 0.0 {
        return Err(ErrorInfo::new(
            "invalid_field",
            "contextUtilization must be a non-negative number",
        ));
    }
    if !state.burn_rate.is_finite() || state.burn_rate < 0.0 {
        return Err(ErrorInfo::new(
            "invalid_field",
            "burnRate must be a non-negative number",
        ));
    }
    for subagent in &state.subagents {
        require_string(&subagent.id, "subagents[].id")?;
    }
    Ok(())
}

fn require_string(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if value.trim().is_empty() {
        return Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        ));
    }
    Ok(())
}
