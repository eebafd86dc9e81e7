//! Session snapshot types emitted by the monitor and rendered by every client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle classification of an observed agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    #[default]
    Starting,
    Thinking,
    ToolUse,
    Waiting,
    Idle,
    Complete,
    Errored,
    Lost,
}

impl Activity {
    /// Terminal activities end a session; they never count as active.
    pub fn is_terminal(self) -> bool {
        matches!(self, Activity::Complete | Activity::Errored | Activity::Lost)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Starting => "starting",
            Activity::Thinking => "thinking",
            Activity::ToolUse => "tool_use",
            Activity::Waiting => "waiting",
            Activity::Idle => "idle",
            Activity::Complete => "complete",
            Activity::Errored => "errored",
            Activity::Lost => "lost",
        }
    }
}

/// A nested agent run spawned by a session. Shares the parent's id space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentState {
    pub id: String,
    pub parent_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub activity: Activity,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub tool_call_count: u64,
    #[serde(default)]
    pub message_count: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One observed agent session.
///
/// `lane` is owned by the session store: whatever value the monitor sends is
/// replaced by the lane assigned on first insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub activity: Activity,
    /// Cumulative tokens consumed over the session lifetime.
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub max_tokens: u64,
    /// Fraction of the context window in use, 0.0..=1.0.
    #[serde(default)]
    pub context_utilization: f64,
    /// Tokens per minute over the recent sampling window.
    #[serde(default)]
    pub burn_rate: f64,
    #[serde(default)]
    pub current_tool: Option<String>,
    #[serde(default)]
    pub tool_call_count: u64,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_data_received_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lane: u32,
    #[serde(default)]
    pub subagents: Vec<SubagentState>,
}

impl SessionState {
    /// Creates a freshly discovered session in the `Starting` activity.
    pub fn new(id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            slug: id.clone(),
            id,
            source: String::new(),
            model: String::new(),
            activity: Activity::Starting,
            tokens_used: 0,
            max_tokens: 0,
            context_utilization: 0.0,
            burn_rate: 0.0,
            current_tool: None,
            tool_call_count: 0,
            message_count: 0,
            working_dir: None,
            branch: None,
            started_at,
            last_activity_at: started_at,
            completed_at: None,
            last_data_received_at: None,
            lane: 0,
            subagents: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.activity.is_terminal()
    }

    /// Wall-clock duration: up to completion for finished sessions, else up to `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self.completed_at.unwrap_or(now);
        end.signed_duration_since(self.started_at)
            .max(chrono::Duration::zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    #[default]
    Healthy,
    Degraded,
    Failed,
}

/// Health of one session source (a monitored agent CLI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub source: String,
    #[serde(default)]
    pub status: SourceStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}
