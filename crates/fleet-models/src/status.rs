//! Session status types and the self-report wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a session as tracked by the status monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Session registered, worker not yet confirmed running.
    #[default]
    Initializing,
    /// Worker is at rest, waiting for a task.
    Idle,
    /// Worker is actively computing.
    Working,
    /// Worker is blocked on a question for the user.
    Waiting,
    /// Worker finished its task.
    Done,
    /// Worker failed.
    Error,
}

impl AgentState {
    /// Terminal states are never left by automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done | AgentState::Error)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Initializing => "initializing",
            AgentState::Idle => "idle",
            AgentState::Working => "working",
            AgentState::Waiting => "waiting",
            AgentState::Done => "done",
            AgentState::Error => "error",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the current status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// Set by the orchestrator itself (registration, explicit update).
    #[default]
    Manual,
    /// Written by the agent through its status file.
    SelfReport,
    /// Inferred from the pane's visible text.
    Heuristic,
    /// Forced by the idle timeout.
    IdleTimeout,
    /// Derived from the worker process exiting.
    Process,
}

/// Current status of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Current state.
    pub state: AgentState,
    /// Free-text description of what the worker is doing.
    pub message: String,
    /// Last time activity was observed. Never moves backwards.
    pub last_activity: DateTime<Utc>,
    /// Question the worker is waiting on. Only set while `state == Waiting`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_input: Option<String>,
    /// Optional progress, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    /// Where this status came from.
    #[serde(default)]
    pub source: StatusSource,
}

impl SessionStatus {
    /// Creates the initial status of a freshly registered session.
    pub fn initializing() -> Self {
        Self {
            state: AgentState::Initializing,
            message: "Initializing".to_string(),
            last_activity: Utc::now(),
            needs_input: None,
            progress: None,
            source: StatusSource::Manual,
        }
    }

    /// Merges a partial update into this status.
    ///
    /// `last_activity` becomes `max(previous, now)` and `needs_input` is
    /// cleared whenever the resulting state is not `Waiting`.
    pub fn apply(&mut self, update: &StatusUpdate, now: DateTime<Utc>) {
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(message) = &update.message {
            self.message = message.clone();
        }
        if update.needs_input.is_some() {
            self.needs_input = update.needs_input.clone();
        }
        if update.progress.is_some() {
            self.progress = update.progress;
        }
        if self.state != AgentState::Waiting {
            self.needs_input = None;
        }
        self.source = update.source;
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::initializing()
    }
}

/// A partial status update. Unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusUpdate {
    /// New state.
    pub state: Option<AgentState>,
    /// New message.
    pub message: Option<String>,
    /// Question the worker is blocked on.
    pub needs_input: Option<String>,
    /// New progress value.
    pub progress: Option<f32>,
    /// Source of the update.
    pub source: StatusSource,
}

impl StatusUpdate {
    /// Creates an update that only changes the state.
    pub fn state(state: AgentState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the needs-input prompt.
    pub fn with_needs_input(mut self, prompt: impl Into<String>) -> Self {
        self.needs_input = Some(prompt.into());
        self
    }

    /// Sets the progress.
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Sets the source.
    pub fn with_source(mut self, source: StatusSource) -> Self {
        self.source = source;
        self
    }
}

/// State vocabulary used by agents in their status files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedState {
    Idle,
    Working,
    NeedsInput,
    Finished,
    Error,
}

impl From<ReportedState> for AgentState {
    fn from(state: ReportedState) -> Self {
        match state {
            ReportedState::Idle => AgentState::Idle,
            ReportedState::Working => AgentState::Working,
            ReportedState::NeedsInput => AgentState::Waiting,
            ReportedState::Finished => AgentState::Done,
            ReportedState::Error => AgentState::Error,
        }
    }
}

impl std::str::FromStr for ReportedState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(ReportedState::Idle),
            "working" => Ok(ReportedState::Working),
            "needs_input" => Ok(ReportedState::NeedsInput),
            "finished" => Ok(ReportedState::Finished),
            "error" => Ok(ReportedState::Error),
            other => Err(format!(
                "unknown state '{}' (expected idle, working, needs_input, finished or error)",
                other
            )),
        }
    }
}

/// Contents of an agent's status file.
///
/// ```json
/// {"agentId": "sess-1a2b3c4d", "state": "needs_input", "message": "Pick a db",
///  "timestamp": "2026-01-01T12:00:00Z", "needsInputPrompt": "postgres or sqlite?"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Session id the agent believes it is.
    #[serde(default)]
    pub agent_id: String,
    /// Reported state.
    pub state: ReportedState,
    /// What the agent is doing.
    #[serde(default)]
    pub message: String,
    /// When the agent wrote the report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Question for the user, when `state == needs_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_input_prompt: Option<String>,
    /// Optional progress, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

impl StatusReport {
    /// Creates a report stamped with the current time.
    pub fn new(agent_id: impl Into<String>, state: ReportedState, message: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            state,
            message: message.into(),
            timestamp: Some(Utc::now()),
            needs_input_prompt: None,
            progress: None,
        }
    }

    /// Converts the report into a status update attributed to self-report.
    pub fn to_update(&self) -> StatusUpdate {
        StatusUpdate {
            state: Some(self.state.into()),
            message: Some(self.message.clone()),
            needs_input: self
                .needs_input_prompt
                .clone()
                .filter(|p| !p.trim().is_empty()),
            progress: self.progress,
            source: StatusSource::SelfReport,
        }
    }
}
