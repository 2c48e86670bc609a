//! The agent side of self-reporting.
//!
//! Workers are spawned with `FLEET_SESSION_ID` and `FLEET_SESSION_STATUS_DIR`
//! in their environment; reporting writes `<status_dir>/<session_id>.json` atomically so
//! the monitor never reads a half-written file.

use std::path::PathBuf;

use fleet_models::{ReportedState, StatusReport};
use tracing::{debug, warn};

use crate::error::Result;

/// Environment variable carrying the worker's session id.
pub const SESSION_ID_ENV: &str = "FLEET_SESSION_ID";

/// Environment variable carrying the owning instance id.
pub const INSTANCE_ID_ENV: &str = "FLEET_INSTANCE_ID";

/// Environment variable carrying the exact directory a worker reports into.
///
/// Distinct from `FLEET_STATUS_DIR`, which overrides the root of all
/// instance status directories for every `fleet` invocation.
pub const SESSION_STATUS_DIR_ENV: &str = "FLEET_SESSION_STATUS_DIR";

/// Writes status files on behalf of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfReport {
    session_id: String,
    status_dir: PathBuf,
}

impl SelfReport {
    pub fn new(session_id: impl Into<String>, status_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            status_dir: status_dir.into(),
        }
    }

    /// Builds a reporter from the worker environment.
    ///
    /// Returns `None` when no session id was handed to this process.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let session_id = lookup(SESSION_ID_ENV).filter(|s| !s.trim().is_empty())?;
        let status_dir = match (lookup(SESSION_STATUS_DIR_ENV), lookup(INSTANCE_ID_ENV)) {
            (Some(dir), _) => PathBuf::from(dir),
            (None, Some(instance)) => fleet_core::status_dir(&instance),
            (None, None) => fleet_core::status_root(),
        };
        Some(Self::new(session_id, status_dir))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Path of this session's status file.
    pub fn path(&self) -> PathBuf {
        self.status_dir.join(format!("{}.json", self.session_id))
    }

    /// Writes a report.
    pub fn write(
        &self,
        state: ReportedState,
        message: &str,
        needs_input_prompt: Option<&str>,
    ) -> Result<PathBuf> {
        let mut report = StatusReport::new(&self.session_id, state, message);
        report.needs_input_prompt = needs_input_prompt.map(str::to_string);
        self.write_report(&report)
    }

    /// Writes a prepared report, stamping it with this session's id.
    pub fn write_report(&self, report: &StatusReport) -> Result<PathBuf> {
        let path = self.path();
        let mut report = report.clone();
        report.agent_id = self.session_id.clone();
        fleet_persistence::atomic::atomic_write_json(&path, &report)?;
        debug!(session_id = %self.session_id, state = ?report.state, path = %path.display(), "status reported");
        Ok(path)
    }

    /// Writes a report for the session named in the environment.
    ///
    /// Without `FLEET_SESSION_ID` this logs a warning and does nothing.
    pub fn write_from_env(
        state: ReportedState,
        message: &str,
        needs_input_prompt: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        match Self::from_env() {
            Some(reporter) => reporter.write(state, message, needs_input_prompt).map(Some),
            None => {
                warn!("{} is not set; status report skipped", SESSION_ID_ENV);
                Ok(None)
            }
        }
    }
}
