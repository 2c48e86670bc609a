//! Error types for the runtime crate.

use std::path::PathBuf;

use fleet_models::SessionId;
use thiserror::Error;

/// Errors that can occur in the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Session creation failed part-way; everything it set up was rolled back.
    #[error("failed to create session {session_id}: {source}")]
    SessionCreation {
        /// Id the session would have had.
        session_id: SessionId,
        /// Underlying cause.
        #[source]
        source: Box<RuntimeError>,
    },

    /// Session not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Maximum sessions reached.
    #[error("maximum sessions reached: {0}")]
    MaxSessionsReached(usize),

    /// An active process is already tracked for this session.
    #[error("process already running for session {0}")]
    ProcessExists(SessionId),

    /// Something already occupies the workspace path.
    #[error("workspace already exists: {}", .0.display())]
    WorkspaceExists(PathBuf),

    /// A git command failed.
    #[error("git error: {0}")]
    Git(String),

    /// Spawning a worker failed.
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        /// Command line that failed.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required external tool is not installed.
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistence error.
    #[error("persistence error: {0}")]
    Persistence(#[from] fleet_persistence::PersistenceError),

    /// Tmux error.
    #[error("tmux error: {0}")]
    Tmux(#[from] fleet_tmux::TmuxError),

    /// Filesystem watch error.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Fails with `ToolNotFound` unless `tool` is on PATH.
pub fn require_tool(tool: &str) -> Result<()> {
    which::which(tool)
        .map(|_| ())
        .map_err(|_| RuntimeError::ToolNotFound(tool.to_string()))
}
