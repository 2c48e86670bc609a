//! Session type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::SessionId;
use crate::instance::SessionMetadata;
use crate::mode::AgentMode;
use crate::status::SessionStatus;

/// One tracked worker process plus its isolated workspace and status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique identifier.
    pub id: SessionId,
    /// Short, monotonically increasing number shown to users.
    pub display_id: u32,
    /// Branch checked out in the session's workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Isolated workspace, if one was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    /// Worker kind.
    pub mode: AgentMode,
    /// Status snapshot, owned by the status monitor.
    pub status: SessionStatus,
    /// Worker process id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Repository the session works on.
    pub repo_path: PathBuf,
}

impl Session {
    /// Creates a new session in the `initializing` state.
    pub fn new(display_id: u32, mode: AgentMode, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            id: SessionId::new(),
            display_id,
            branch: None,
            workspace_path: None,
            mode,
            status: SessionStatus::initializing(),
            pid: None,
            created_at: Utc::now(),
            repo_path: repo_path.into(),
        }
    }

    /// Sets the branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Returns the directory the worker runs in.
    pub fn working_dir(&self) -> &PathBuf {
        self.workspace_path.as_ref().unwrap_or(&self.repo_path)
    }

    /// Returns the durable subset of this session.
    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            id: self.id.clone(),
            display_id: self.display_id,
            branch: self.branch.clone(),
            mode: self.mode,
            workspace_path: self.workspace_path.clone(),
            created_at: self.created_at,
            pane_id: None,
        }
    }
}
