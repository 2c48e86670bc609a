//! Worker kinds a session can run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of worker a session runs.
///
/// The set is closed: every mode maps to exactly one launch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Claude Code interactive agent.
    #[default]
    Claude,
    /// Gemini CLI agent.
    Gemini,
    /// Codex CLI agent.
    Codex,
    /// Plain interactive shell.
    Shell,
}

impl AgentMode {
    /// All supported modes.
    pub const ALL: [AgentMode; 4] = [
        AgentMode::Claude,
        AgentMode::Gemini,
        AgentMode::Codex,
        AgentMode::Shell,
    ];

    /// Returns the lowercase name used on the command line and on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Claude => "claude",
            AgentMode::Gemini => "gemini",
            AgentMode::Codex => "codex",
            AgentMode::Shell => "shell",
        }
    }

    /// Returns the command and arguments that launch this worker.
    pub fn launch_command(&self) -> (String, Vec<String>) {
        match self {
            AgentMode::Claude => ("claude".to_string(), Vec::new()),
            AgentMode::Gemini => ("gemini".to_string(), Vec::new()),
            AgentMode::Codex => ("codex".to_string(), Vec::new()),
            AgentMode::Shell => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
                (shell, Vec::new())
            }
        }
    }

    /// Returns the launch command joined into a single shell line.
    pub fn launch_line(&self) -> String {
        let (cmd, args) = self.launch_command();
        if args.is_empty() {
            cmd
        } else {
            format!("{} {}", cmd, args.join(" "))
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(pub String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown mode '{}' (expected claude, gemini, codex or shell)",
            self.0
        )
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for AgentMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "cc" | "claude-code" => Ok(AgentMode::Claude),
            "gemini" => Ok(AgentMode::Gemini),
            "codex" => Ok(AgentMode::Codex),
            "shell" | "sh" => Ok(AgentMode::Shell),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}
