//! tmux implementation of [`PaneDriver`].

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tracing::{debug, trace, warn};

use crate::pane::PANE_FORMAT;
use crate::{PaneDriver, PaneInfo, Result, TmuxError};

/// Pane driver backed by the tmux binary.
#[derive(Debug, Clone)]
pub struct TmuxDriver {
    /// Path to tmux binary.
    tmux_path: PathBuf,
}

impl TmuxDriver {
    /// Create a new TmuxDriver.
    ///
    /// # Errors
    ///
    /// Returns `TmuxError::NotFound` if tmux is not in PATH.
    pub fn new() -> Result<Self> {
        let tmux_path = Self::find_tmux()?;
        debug!(path = %tmux_path.display(), "tmux found");
        Ok(Self { tmux_path })
    }

    fn find_tmux() -> Result<PathBuf> {
        which::which("tmux").map_err(|_| TmuxError::NotFound)
    }

    /// Run a tmux command and return the raw output.
    fn run_tmux(&self, args: &[&str]) -> Result<Output> {
        trace!(args = ?args, "running tmux command");
        let output = Command::new(&self.tmux_path).args(args).output()?;
        trace!(
            status = %output.status,
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "tmux command completed"
        );
        Ok(output)
    }

    /// Run a tmux command and check for success.
    fn run_tmux_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run_tmux(args)?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(TmuxError::Command(stderr))
        }
    }

    /// Run a command that prints one pane line (`-P -F`) and parse it.
    fn run_tmux_pane(&self, args: &[&str]) -> Result<PaneInfo> {
        let output = self.run_tmux_checked(args)?;
        let line = output.lines().next().unwrap_or_default();
        PaneInfo::parse(line)
    }

    /// Map a failed pane-targeted command to `PaneNotFound` when tmux says so.
    fn pane_error(pane: &str, err: TmuxError) -> TmuxError {
        match err {
            TmuxError::Command(msg) if msg.contains("can't find pane") => {
                TmuxError::PaneNotFound(pane.to_string())
            }
            other => other,
        }
    }
}

/// Session target that only matches `name` exactly.
///
/// A bare `-t name` falls back to prefix matching, so `fleet-widget` would
/// also hit `fleet-widget-1f2e3d4c`.
fn session_target(name: &str) -> String {
    format!("={}", name)
}

/// Window or pane target in the exactly-named session.
fn window_target(name: &str) -> String {
    format!("={}:", name)
}

fn cwd_arg(cwd: &Path) -> String {
    cwd.to_string_lossy().to_string()
}

impl PaneDriver for TmuxDriver {
    fn create_group(&self, name: &str, cwd: &Path) -> Result<PaneInfo> {
        debug!(name = %name, cwd = %cwd.display(), "creating pane group");

        if self.group_exists(name) {
            return Err(TmuxError::GroupExists(name.to_string()));
        }

        let cwd = cwd_arg(cwd);
        self.run_tmux_pane(&[
            "new-session", "-d", "-s", name, "-c", &cwd, "-P", "-F", PANE_FORMAT,
        ])
    }

    fn group_exists(&self, name: &str) -> bool {
        let target = session_target(name);
        let output = self.run_tmux(&["has-session", "-t", target.as_str()]);
        matches!(output, Ok(o) if o.status.success())
    }

    fn kill_group(&self, name: &str) -> Result<()> {
        debug!(name = %name, "destroying pane group");

        if !self.group_exists(name) {
            return Err(TmuxError::GroupNotFound(name.to_string()));
        }

        let target = session_target(name);
        self.run_tmux_checked(&["kill-session", "-t", target.as_str()])?;
        Ok(())
    }

    fn split_pane(&self, group: &str, cwd: &Path) -> Result<PaneInfo> {
        debug!(group = %group, cwd = %cwd.display(), "splitting pane");

        if !self.group_exists(group) {
            return Err(TmuxError::GroupNotFound(group.to_string()));
        }

        let cwd = cwd_arg(cwd);
        let target = window_target(group);
        let pane = self.run_tmux_pane(&[
            "split-window", "-t", target.as_str(), "-c", &cwd, "-P", "-F", PANE_FORMAT,
        ])?;

        // Keep panes usable as more are added
        if let Err(e) = self.run_tmux_checked(&["select-layout", "-t", target.as_str(), "tiled"]) {
            warn!(group = %group, error = %e, "failed to re-tile panes");
        }

        Ok(pane)
    }

    fn run_command(&self, pane: &str, command: &str) -> Result<()> {
        debug!(pane = %pane, command = %command, "running command in pane");
        self.send_literal(pane, command, true)
    }

    fn send_literal(&self, pane: &str, text: &str, submit: bool) -> Result<()> {
        trace!(pane = %pane, len = text.len(), submit, "sending literal input");

        self.run_tmux_checked(&["send-keys", "-t", pane, "-l", text])
            .map_err(|e| Self::pane_error(pane, e))?;
        if submit {
            self.run_tmux_checked(&["send-keys", "-t", pane, "Enter"])
                .map_err(|e| Self::pane_error(pane, e))?;
        }
        Ok(())
    }

    fn kill_pane(&self, pane: &str) -> Result<()> {
        debug!(pane = %pane, "killing pane");
        self.run_tmux_checked(&["kill-pane", "-t", pane])
            .map_err(|e| Self::pane_error(pane, e))?;
        Ok(())
    }

    fn capture(&self, pane: &str, lines: u32) -> Result<String> {
        let start = format!("-{}", lines);
        self.run_tmux_checked(&["capture-pane", "-p", "-J", "-t", pane, "-S", &start])
            .map_err(|e| Self::pane_error(pane, e))
    }

    fn list_panes(&self, group: &str) -> Result<Vec<PaneInfo>> {
        if !self.group_exists(group) {
            return Err(TmuxError::GroupNotFound(group.to_string()));
        }

        let target = session_target(group);
        let output = self.run_tmux_checked(&["list-panes", "-s", "-t", target.as_str(), "-F", PANE_FORMAT])?;

        let mut panes = Vec::new();
        for line in output.lines() {
            if line.is_empty() {
                continue;
            }
            match PaneInfo::parse(line) {
                Ok(pane) => panes.push(pane),
                Err(e) => {
                    warn!(line = %line, error = %e, "failed to parse pane");
                }
            }
        }

        Ok(panes)
    }

    fn set_title(&self, pane: &str, title: &str) -> Result<()> {
        self.run_tmux_checked(&["select-pane", "-t", pane, "-T", title])
            .map_err(|e| Self::pane_error(pane, e))?;
        Ok(())
    }

    fn select_pane(&self, pane: &str) -> Result<()> {
        self.run_tmux_checked(&["select-pane", "-t", pane])
            .map_err(|e| Self::pane_error(pane, e))?;
        Ok(())
    }

    fn attach(&self, group: &str) -> Result<()> {
        if !self.group_exists(group) {
            return Err(TmuxError::GroupNotFound(group.to_string()));
        }

        // Inside tmux, attaching would nest; switch the client instead
        let verb = if std::env::var_os("TMUX").is_some() {
            "switch-client"
        } else {
            "attach-session"
        };
        debug!(group = %group, verb, "attaching to pane group");

        let target = session_target(group);
        let status = Command::new(&self.tmux_path)
            .args([verb, "-t", target.as_str()])
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(TmuxError::Command(format!("{} exited with {}", verb, status)))
        }
    }
}
