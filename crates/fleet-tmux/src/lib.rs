//! Terminal pane driver for Fleet.
//!
//! Every instance lives in one pane group (a tmux session); every session in
//! one pane of that group. This crate provides:
//! - [`PaneDriver`]: the operations Fleet needs from a multiplexer
//! - [`TmuxDriver`]: the tmux implementation
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use fleet_tmux::{PaneDriver, TmuxDriver};
//!
//! let tmux = TmuxDriver::new().expect("tmux not found");
//!
//! let first = tmux.create_group("fleet-widget", Path::new("/code/widget")).unwrap();
//! tmux.run_command(&first.id, "claude").unwrap();
//!
//! let second = tmux.split_pane("fleet-widget", Path::new("/code/widget")).unwrap();
//! tmux.send_literal(&second.id, "echo hello", true).unwrap();
//!
//! let text = tmux.capture(&first.id, 40).unwrap();
//! println!("{}", text);
//!
//! tmux.kill_group("fleet-widget").unwrap();
//! ```

pub mod driver;
pub mod error;
pub mod pane;
pub mod tmux;

pub use driver::PaneDriver;
pub use error::{Result, TmuxError};
pub use pane::PaneInfo;
pub use tmux::TmuxDriver;
