//! The pane driver interface.

use std::path::Path;

use crate::{PaneInfo, Result};

/// Operations Fleet needs from a terminal multiplexer.
///
/// A *pane group* hosts all panes of one instance (a tmux session). Panes are
/// addressed by their server-unique id.
pub trait PaneDriver: Send + Sync {
    /// Creates a detached pane group whose first pane starts in `cwd`.
    fn create_group(&self, name: &str, cwd: &Path) -> Result<PaneInfo>;

    /// Checks whether a pane group exists.
    fn group_exists(&self, name: &str) -> bool;

    /// Destroys a pane group and every pane in it.
    fn kill_group(&self, name: &str) -> Result<()>;

    /// Splits a new pane off the group, starting in `cwd`.
    fn split_pane(&self, group: &str, cwd: &Path) -> Result<PaneInfo>;

    /// Runs a shell command line in a pane.
    fn run_command(&self, pane: &str, command: &str) -> Result<()>;

    /// Types literal text into a pane, then presses Enter if `submit`.
    fn send_literal(&self, pane: &str, text: &str, submit: bool) -> Result<()>;

    /// Kills a single pane.
    fn kill_pane(&self, pane: &str) -> Result<()>;

    /// Captures the last `lines` lines of a pane's visible text.
    fn capture(&self, pane: &str, lines: u32) -> Result<String>;

    /// Lists the panes of a group with index and title.
    fn list_panes(&self, group: &str) -> Result<Vec<PaneInfo>>;

    /// Sets a pane's title.
    fn set_title(&self, pane: &str, title: &str) -> Result<()>;

    /// Makes a pane the active one.
    fn select_pane(&self, pane: &str) -> Result<()>;

    /// Attaches the current terminal to the group, or switches to it when
    /// already inside the multiplexer.
    fn attach(&self, group: &str) -> Result<()>;
}
