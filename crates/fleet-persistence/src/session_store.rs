//! Per-instance store of session metadata.

use std::path::{Path, PathBuf};

use fleet_models::{SessionId, SessionMetadata, SessionStoreFile};
use tracing::debug;

use crate::atomic::{atomic_write_json, read_json_or_default, remove_file};
use crate::error::Result;

/// Persists the durable subset of each session so a later CLI invocation
/// can find sessions started by an earlier one.
///
/// One JSON file per instance:
/// ```text
/// {"version": 1, "sessions": [{"id": "sess-…", "displayId": 1, …}]}
/// ```
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Creates a store backed by the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the store of an instance under the default state directory.
    pub fn for_instance(instance_id: &str) -> Self {
        Self::new(fleet_core::session_store_file(instance_id))
    }

    /// Returns the store file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all sessions, ordered by display id.
    pub fn load(&self) -> Result<Vec<SessionMetadata>> {
        let file: SessionStoreFile = read_json_or_default(&self.path);
        let mut sessions = file.sessions;
        sessions.sort_by_key(|s| s.display_id);
        Ok(sessions)
    }

    /// Replaces the stored sessions.
    pub fn save(&self, sessions: &[SessionMetadata]) -> Result<()> {
        let file = SessionStoreFile {
            sessions: sessions.to_vec(),
            ..SessionStoreFile::default()
        };
        atomic_write_json(&self.path, &file)
    }

    /// Inserts or replaces one session.
    pub fn upsert(&self, session: SessionMetadata) -> Result<()> {
        let mut sessions = self.load()?;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(existing) => *existing = session,
            None => sessions.push(session),
        }
        self.save(&sessions)
    }

    /// Removes one session. Returns whether it existed.
    pub fn remove(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.load()?;
        let before = sessions.len();
        sessions.retain(|s| &s.id != id);
        if sessions.len() == before {
            return Ok(false);
        }
        self.save(&sessions)?;
        Ok(true)
    }

    /// Finds a session by id or display id.
    pub fn find(&self, key: &str) -> Result<Option<SessionMetadata>> {
        let sessions = self.load()?;
        Ok(sessions
            .into_iter()
            .find(|s| s.id.as_str() == key || s.display_id.to_string() == key))
    }

    /// Returns the display id the next session should use.
    pub fn next_display_id(&self) -> Result<u32> {
        let sessions = self.load()?;
        Ok(sessions.iter().map(|s| s.display_id).max().unwrap_or(0) + 1)
    }

    /// Deletes the store file.
    pub fn clear(&self) -> Result<()> {
        if remove_file(&self.path)? {
            debug!(path = %self.path.display(), "session store removed");
        }
        Ok(())
    }
}
