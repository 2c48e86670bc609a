//! Cross-invocation bookkeeping: registered instances and session metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::ids::SessionId;
use crate::mode::AgentMode;

/// Current on-disk format version for registry and session store files.
pub const FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    FORMAT_VERSION
}

/// One orchestrator instance registered for a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// Instance id, derived from the repository path.
    pub id: String,
    /// Absolute repository path.
    pub repo_path: PathBuf,
    /// Pane group (tmux session) hosting the instance.
    pub pane_group: String,
    /// Process that registered the instance.
    pub pid: u32,
    /// When the instance was registered.
    pub started_at: DateTime<Utc>,
    /// Number of sessions started with the instance.
    pub session_count: usize,
}

/// Durable subset of a session, kept across CLI invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub id: SessionId,
    pub display_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub mode: AgentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    /// Pane hosting the session, when it runs inside a pane group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<String>,
}

/// Instance registry file: `{version, instances: {id: InstanceInfo}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRegistryFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceInfo>,
}

impl Default for InstanceRegistryFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            instances: BTreeMap::new(),
        }
    }
}

/// Session store file: `{version, sessions: [SessionMetadata]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStoreFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub sessions: Vec<SessionMetadata>,
}

impl Default for SessionStoreFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            sessions: Vec::new(),
        }
    }
}
