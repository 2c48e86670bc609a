//! Pane driver errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmuxError {
    /// No tmux binary on `PATH`.
    #[error("tmux not found in PATH")]
    NotFound,

    #[error("pane group '{0}' not found")]
    GroupNotFound(String),

    #[error("pane group '{0}' already exists")]
    GroupExists(String),

    #[error("pane '{0}' not found")]
    PaneNotFound(String),

    /// tmux ran but reported failure; carries its stderr.
    #[error("tmux: {0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Output that does not match the requested `-F` format.
    #[error("unexpected tmux output: {0}")]
    Output(String),
}

pub type Result<T> = std::result::Result<T, TmuxError>;
