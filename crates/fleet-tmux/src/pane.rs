//! Pane data structures.

use crate::{Result, TmuxError};

/// Format string passed to `list-panes -F`; must match [`PaneInfo::parse`].
pub(crate) const PANE_FORMAT: &str =
    "#{pane_id}:#{pane_index}:#{pane_active}:#{pane_width}:#{pane_height}:#{pane_title}";

/// A pane within a pane group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// Pane ID (e.g., "%0", "%1"). Unique across the tmux server.
    pub id: String,
    /// Pane index within its window.
    pub index: u32,
    /// Whether this pane is active.
    pub active: bool,
    /// Pane width in characters.
    pub width: u32,
    /// Pane height in characters.
    pub height: u32,
    /// Pane title.
    pub title: String,
}

impl PaneInfo {
    /// Create a new PaneInfo.
    pub fn new(id: impl Into<String>, index: u32, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            active: false,
            width: 0,
            height: 0,
            title: title.into(),
        }
    }

    /// Parse a pane from one `list-panes` output line.
    ///
    /// Expected format: `pane_id:pane_index:pane_active:pane_width:pane_height:pane_title`.
    /// The title may itself contain colons.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.splitn(6, ':').collect();
        if parts.len() < 5 {
            return Err(TmuxError::Output(format!(
                "invalid pane format: {}",
                line
            )));
        }

        let number = |raw: &str, what: &str| -> Result<u32> {
            raw.parse()
                .map_err(|_| TmuxError::Output(format!("invalid pane {}: {}", what, raw)))
        };

        Ok(Self {
            id: parts[0].to_string(),
            index: number(parts[1], "index")?,
            active: parts[2] == "1",
            width: number(parts[3], "width")?,
            height: number(parts[4], "height")?,
            title: parts.get(5).map(|t| t.to_string()).unwrap_or_default(),
        })
    }
}
