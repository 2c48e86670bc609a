//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use fleet_models::{AgentMode, ReportedState};
use std::path::PathBuf;

/// Fleet - run a fleet of coding agents side by side
#[derive(Parser, Debug)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an instance for a repository, one pane per session
    Start {
        /// Repository path (default: current directory)
        path: Option<PathBuf>,

        /// Worker to run in each pane
        #[arg(short, long, default_value = "claude")]
        mode: AgentMode,

        /// Create one isolated workspace per branch
        #[arg(short, long = "branch")]
        branches: Vec<String>,

        /// Number of sessions when no branches are given
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Do not attach after starting
        #[arg(short, long)]
        detach: bool,
    },

    /// Add a session to the running instance
    Add {
        /// Branch for an isolated workspace
        #[arg(short, long)]
        branch: Option<String>,

        /// Worker to run
        #[arg(short, long, default_value = "claude")]
        mode: AgentMode,
    },

    /// Stop the instance for the current repository
    Stop {
        /// Leave session workspaces on disk
        #[arg(long)]
        keep_workspaces: bool,
    },

    /// Show the status of every session
    Status {
        /// Output format (table, json, brief)
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Kill one session
    Kill {
        /// Session id or number
        session: String,

        /// Leave the session's workspace on disk
        #[arg(long)]
        keep_workspace: bool,
    },

    /// Type a message into a session
    Send {
        /// Session id or number
        session: String,

        /// Message to send
        message: String,

        /// Do not press Enter after the message
        #[arg(long)]
        no_enter: bool,
    },

    /// Focus a session's pane
    Focus {
        /// Session id or number
        session: String,
    },

    /// List registered instances
    List {
        /// Output format (table, json, brief)
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Attach to an instance
    Attach {
        /// Instance id (default: the current repository's)
        instance: Option<String>,
    },

    /// Remove stale instances and orphaned workspaces
    Cleanup,

    /// Run sessions headless in the foreground until they finish
    Run {
        /// Repository path (default: current directory)
        path: Option<PathBuf>,

        /// Worker to run
        #[arg(short, long, default_value = "claude")]
        mode: AgentMode,

        /// Create one isolated workspace per branch
        #[arg(short, long = "branch")]
        branches: Vec<String>,

        /// Number of sessions when no branches are given
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Seconds without activity before a working session counts as idle
        #[arg(long, default_value_t = 30)]
        idle_timeout: u64,
    },

    /// Report this session's status (called by agents)
    Report {
        /// idle, working, needs_input, finished or error
        state: ReportedState,

        /// What the agent is doing
        message: String,

        /// Question for the user when the state is needs_input
        #[arg(short, long)]
        prompt: Option<String>,
    },
}

/// Output format for list commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Brief,
}

impl Cli {
    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse_start() {
        let cli = Cli::parse_from(["fleet", "start", "/code/widget", "-b", "a", "-b", "b"]);
        match cli.command {
            Commands::Start {
                path,
                mode,
                branches,
                count,
                detach,
            } => {
                assert_eq!(path, Some(PathBuf::from("/code/widget")));
                assert_eq!(mode, AgentMode::Claude);
                assert_eq!(branches, vec!["a", "b"]);
                assert_eq!(count, 1);
                assert!(!detach);
            }
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_parse_mode() {
        let cli = Cli::parse_from(["fleet", "add", "--mode", "codex"]);
        match cli.command {
            Commands::Add { mode, branch } => {
                assert_eq!(mode, AgentMode::Codex);
                assert!(branch.is_none());
            }
            _ => panic!("Expected Add command"),
        }

        assert!(Cli::try_parse_from(["fleet", "add", "--mode", "vim"]).is_err());
    }

    #[test]
    fn test_cli_parse_report() {
        let cli = Cli::parse_from(["fleet", "report", "needs_input", "Pick one", "-p", "a or b?"]);
        match cli.command {
            Commands::Report {
                state,
                message,
                prompt,
            } => {
                assert_eq!(state, ReportedState::NeedsInput);
                assert_eq!(message, "Pick one");
                assert_eq!(prompt.as_deref(), Some("a or b?"));
            }
            _ => panic!("Expected Report command"),
        }
    }

    #[test]
    fn test_cli_verbose() {
        let cli = Cli::parse_from(["fleet", "list", "-vvv"]);
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_cli_help() {
        Cli::command().debug_assert();
    }
}
