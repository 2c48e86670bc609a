//! Runtime configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use fleet_models::AgentMode;

/// Configuration for the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a `working` session may stay silent before it is marked idle.
    pub idle_timeout: Duration,
    /// How often the idle sweep runs.
    pub sweep_interval: Duration,
    /// How many pane lines to capture for heuristic detection.
    pub capture_lines: u32,
    /// Whether pane-text heuristics are consulted at all.
    pub heuristics_enabled: bool,
    /// Directory watched for self-report status files.
    pub status_dir: PathBuf,
    /// Root under which isolated workspaces are created.
    pub worktree_root: PathBuf,
    /// Maximum concurrent sessions allowed.
    pub max_sessions: usize,
    /// How long a polite SIGTERM is given before SIGKILL.
    pub kill_grace: Duration,
    /// Instance id handed to workers, if running under a registered instance.
    pub instance_id: Option<String>,
    /// Directory receiving headless worker output. Discarded if unset.
    pub log_dir: Option<PathBuf>,
    /// Per-mode replacements for the built-in launch commands.
    pub launch_overrides: HashMap<AgentMode, (String, Vec<String>)>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            capture_lines: 40,
            heuristics_enabled: true,
            status_dir: fleet_core::status_root(),
            worktree_root: fleet_core::worktree_root(),
            max_sessions: 16,
            kill_grace: Duration::from_secs(2),
            instance_id: None,
            log_dir: None,
            launch_overrides: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a config scoped to a registered instance.
    ///
    /// Status files are read from the instance's own status directory.
    pub fn for_instance(instance_id: &str) -> Self {
        Self::default()
            .with_status_dir(fleet_core::status_dir(instance_id))
            .with_instance_id(instance_id)
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the number of captured pane lines.
    pub fn with_capture_lines(mut self, lines: u32) -> Self {
        self.capture_lines = lines;
        self
    }

    /// Enables or disables pane heuristics.
    pub fn with_heuristics(mut self, enabled: bool) -> Self {
        self.heuristics_enabled = enabled;
        self
    }

    /// Sets the status directory.
    pub fn with_status_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.status_dir = dir.into();
        self
    }

    /// Sets the worktree root.
    pub fn with_worktree_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.worktree_root = root.into();
        self
    }

    /// Sets the maximum number of sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Sets the SIGTERM grace period.
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Sets the instance id.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Sets the worker log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Replaces the launch command for one mode.
    pub fn with_launch_command(
        mut self,
        mode: AgentMode,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        self.launch_overrides.insert(mode, (command.into(), args));
        self
    }

    /// Returns the command a mode is launched with.
    pub fn launch_command(&self, mode: AgentMode) -> (String, Vec<String>) {
        self.launch_overrides
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| mode.launch_command())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();

        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.capture_lines, 40);
        assert!(config.heuristics_enabled);
        assert_eq!(config.max_sessions, 16);
        assert!(config.instance_id.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = RuntimeConfig::new()
            .with_idle_timeout(Duration::from_secs(60))
            .with_sweep_interval(Duration::from_secs(1))
            .with_capture_lines(20)
            .with_heuristics(false)
            .with_status_dir("/tmp/status")
            .with_worktree_root("/tmp/worktrees")
            .with_max_sessions(4)
            .with_kill_grace(Duration::from_millis(500));

        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.capture_lines, 20);
        assert!(!config.heuristics_enabled);
        assert_eq!(config.status_dir, PathBuf::from("/tmp/status"));
        assert_eq!(config.worktree_root, PathBuf::from("/tmp/worktrees"));
        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.kill_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_launch_override() {
        let config = RuntimeConfig::new().with_launch_command(
            AgentMode::Claude,
            "/opt/bin/claude",
            vec!["--verbose".to_string()],
        );
        assert_eq!(
            config.launch_command(AgentMode::Claude),
            ("/opt/bin/claude".to_string(), vec!["--verbose".to_string()])
        );
        assert_eq!(
            config.launch_command(AgentMode::Codex),
            AgentMode::Codex.launch_command()
        );
    }

    #[test]
    fn test_for_instance() {
        let config = RuntimeConfig::for_instance("widget");
        assert_eq!(config.instance_id.as_deref(), Some("widget"));
        assert!(config.status_dir.ends_with("widget"));
    }
}
