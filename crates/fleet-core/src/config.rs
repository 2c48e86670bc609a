//! Shared configuration for Fleet.
//!
//! Provides functions to locate Fleet's state directory and the files that
//! independent CLI invocations use to find each other.
//!
//! # Storage Structure
//!
//! All application data is stored under `~/.fleet/`:
//!
//! ```text
//! ~/.fleet/
//! ├── instances.json          # Instance registry (one per user)
//! ├── sessions/               # Session stores, one file per instance
//! │   └── {instance_id}.json
//! ├── status/                 # Agent self-report files
//! │   └── {instance_id}/
//! │       └── {session_id}.json
//! ├── worktrees/              # Isolated git worktrees
//! │   └── {repo_name}/
//! │       └── {session_id}/
//! └── logs/
//! ```
//!
//! # Environment Variables
//!
//! - `FLEET_STATE_DIR`: Override the base state directory
//! - `FLEET_WORKTREE_DIR`: Override the worktree root
//! - `FLEET_STATUS_DIR`: Override the status file root
//! - `FLEET_LOG_DIR`: Override the log directory

use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::debug;

/// Environment variable for custom state directory.
pub const STATE_DIR_ENV: &str = "FLEET_STATE_DIR";

/// Environment variable for custom worktree root.
pub const WORKTREE_DIR_ENV: &str = "FLEET_WORKTREE_DIR";

/// Environment variable for custom status file root.
pub const STATUS_DIR_ENV: &str = "FLEET_STATUS_DIR";

/// Environment variable for custom log directory.
pub const LOG_DIR_ENV: &str = "FLEET_LOG_DIR";

/// Default state directory name under home.
const DEFAULT_STATE_DIR: &str = ".fleet";

const SESSIONS_SUBDIR: &str = "sessions";
const STATUS_SUBDIR: &str = "status";
const WORKTREES_SUBDIR: &str = "worktrees";
const LOGS_SUBDIR: &str = "logs";

static STATE_DIR_CACHE: OnceLock<PathBuf> = OnceLock::new();

/// Get the Fleet state directory.
///
/// The state directory is determined by:
/// 1. `FLEET_STATE_DIR` environment variable if set
/// 2. `~/.fleet` if home directory is available
/// 3. `.fleet` in current directory as fallback
pub fn state_dir() -> PathBuf {
    STATE_DIR_CACHE
        .get_or_init(|| {
            std::env::var(STATE_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    dirs::home_dir()
                        .map(|h| h.join(DEFAULT_STATE_DIR))
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR))
                })
        })
        .clone()
}

/// Get the instance registry file path.
pub fn instance_registry_file() -> PathBuf {
    state_dir().join("instances.json")
}

/// Get the directory holding per-instance session stores.
pub fn sessions_dir() -> PathBuf {
    state_dir().join(SESSIONS_SUBDIR)
}

/// Get the session store file for an instance.
pub fn session_store_file(instance_id: &str) -> PathBuf {
    sessions_dir().join(format!("{}.json", instance_id))
}

/// Get the root of all status directories.
///
/// Defaults to `~/.fleet/status/` or `FLEET_STATUS_DIR` env var.
pub fn status_root() -> PathBuf {
    std::env::var(STATUS_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join(STATUS_SUBDIR))
}

/// Get the status directory watched for one instance.
pub fn status_dir(instance_id: &str) -> PathBuf {
    status_root().join(instance_id)
}

/// Get the root directory for isolated worktrees.
///
/// Defaults to `~/.fleet/worktrees/` or `FLEET_WORKTREE_DIR` env var.
pub fn worktree_root() -> PathBuf {
    std::env::var(WORKTREE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join(WORKTREES_SUBDIR))
}

/// Get the logs directory.
pub fn logs_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| state_dir().join(LOGS_SUBDIR))
}

/// Get the .env.local file path.
pub fn env_file() -> PathBuf {
    state_dir().join(".env.local")
}

/// Load `.env.local` from the state directory, then from the working directory.
///
/// Missing files are not an error.
pub fn load_env() {
    let path = env_file();
    if path.exists() {
        match dotenvy::from_path(&path) {
            Ok(()) => debug!(path = %path.display(), "loaded env file"),
            Err(e) => debug!(path = %path.display(), error = %e, "failed to load env file"),
        }
    }
    let _ = dotenvy::from_filename(".env.local");
}

/// Ensure the state directory and its fixed subdirectories exist.
///
/// # Errors
/// Returns an error if any directory cannot be created.
pub fn ensure_state_dir() -> std::io::Result<()> {
    std::fs::create_dir_all(state_dir())?;
    std::fs::create_dir_all(sessions_dir())?;
    std::fs::create_dir_all(status_root())?;
    std::fs::create_dir_all(worktree_root())?;
    Ok(())
}
