//! Tracked worker process bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// A worker process spawned for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    /// OS process id.
    pub pid: u32,
    /// Session that owns the process.
    pub session_id: SessionId,
    /// Full command line.
    pub command: String,
    /// When the process was spawned.
    pub started_at: DateTime<Utc>,
    /// Exit code, once known. `None` after exit means killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process has exited.
    pub exited: bool,
}

impl ProcessEntry {
    /// Creates an entry for a freshly spawned process.
    pub fn new(pid: u32, session_id: SessionId, command: impl Into<String>) -> Self {
        Self {
            pid,
            session_id,
            command: command.into(),
            started_at: Utc::now(),
            exit_code: None,
            exited: false,
        }
    }

    /// Returns true while the process has not been observed exiting.
    pub fn is_active(&self) -> bool {
        !self.exited
    }

    /// Records the exit. Only the first call has an effect.
    ///
    /// Returns true if this call recorded the exit.
    pub fn mark_exited(&mut self, exit_code: Option<i32>) -> bool {
        if self.exited {
            return false;
        }
        self.exited = true;
        self.exit_code = exit_code;
        true
    }
}
