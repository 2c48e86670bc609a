//! Fleet CLI library.
//!
//! This crate provides the `fleet` command-line interface: pane-backed
//! instances driven through tmux, and headless runs driven through the
//! session manager.

pub mod cli;
pub mod commands;
pub mod run;

use std::path::{Path, PathBuf};

use fleet_models::{AgentMode, SessionMetadata};
use fleet_runtime::{INSTANCE_ID_ENV, SESSION_ID_ENV, SESSION_STATUS_DIR_ENV};

/// Resolves the repository a command works on.
///
/// Defaults to the current directory. The path must exist and be a readable
/// directory; the returned path is canonical.
pub fn resolve_repo(path: Option<&Path>) -> Result<PathBuf, String> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| format!("Cannot read current directory: {}", e))?,
    };

    if !path.exists() {
        return Err(format!("Repository path does not exist: {}", path.display()));
    }
    if !path.is_dir() {
        return Err(format!("Repository path is not a directory: {}", path.display()));
    }
    if path.read_dir().is_err() {
        return Err(format!(
            "Cannot access repository path: {} (permission denied)",
            path.display()
        ));
    }

    Ok(path.canonicalize().unwrap_or(path))
}

/// Quotes a word for a POSIX shell command line.
pub fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Builds the shell line that starts a worker inside a pane.
///
/// The worker learns its session id, status directory and instance through
/// the environment so it can report its own status.
pub fn launch_line(
    session: &SessionMetadata,
    status_dir: &Path,
    instance_id: &str,
    mode: AgentMode,
) -> String {
    format!(
        "{}={} {}={} {}={} {}",
        SESSION_ID_ENV,
        shell_quote(session.id.as_str()),
        SESSION_STATUS_DIR_ENV,
        shell_quote(&status_dir.to_string_lossy()),
        INSTANCE_ID_ENV,
        shell_quote(instance_id),
        mode.launch_line()
    )
}

/// Title shown on a session's pane.
pub fn pane_title(session: &SessionMetadata) -> String {
    match &session.branch {
        Some(branch) => format!("#{} {} [{}]", session.display_id, session.mode, branch),
        None => format!("#{} {}", session.display_id, session.mode),
    }
}

/// Truncates a string to the given length, adding "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
