//! Isolated workspace descriptors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ids::SessionId;

/// A git working copy of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    /// Filesystem path of the working copy.
    pub path: PathBuf,
    /// Checked-out branch, if not detached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// HEAD commit hash.
    pub commit: String,
    /// Owning session; `None` for working copies created outside Fleet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Whether this is the repository's main working copy.
    pub is_primary: bool,
}

impl WorkspaceInfo {
    /// Returns true if the working copy is managed by Fleet.
    pub fn is_managed(&self) -> bool {
        self.session_id.is_some()
    }
}
