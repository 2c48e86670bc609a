//! Async session orchestration for Fleet.
//!
//! This crate runs the moving parts of a fleet:
//! - `SessionManager` - creates and destroys sessions as one unit
//! - `WorkspaceManager` - isolated git worktrees per session
//! - `ProcessRegistry` - spawns worker processes and kills their whole tree
//! - `StatusMonitor` - merges self-reports, idle timeouts and heuristics
//! - `PaneHeuristics` - classifies captured pane output
//! - `SelfReport` - the worker side of the status protocol
//!
//! # Example
//!
//! ```ignore
//! use fleet_models::AgentMode;
//! use fleet_runtime::{RuntimeConfig, SessionManager};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Path::new("/code/widget");
//!     let manager = SessionManager::new(RuntimeConfig::default(), repo);
//!     let _watcher = manager.monitor().start_watching().await?;
//!
//!     let mut events = manager.subscribe();
//!     let session = manager
//!         .create_session(Some("feature/login"), AgentMode::Claude, repo, repo)
//!         .await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     manager.destroy_session(&session.id).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Status precedence
//!
//! A worker's own report always wins. Pane heuristics only fill in while a
//! session is idle, initializing, or was last set by a heuristic, and the
//! idle timer only runs while a session is working.

pub mod config;
pub mod detection;
pub mod error;
pub mod event;
pub mod git;
pub mod manager;
pub mod monitor;
pub mod process;
pub mod report;
pub mod workspace;

pub use config::RuntimeConfig;
pub use detection::{PaneHeuristics, PaneTarget};
pub use error::{require_tool, Result, RuntimeError};
pub use event::{ProcessEvent, SessionEvent, StatusEvent};
pub use git::GitRunner;
pub use manager::{CleanupReport, SessionManager};
pub use monitor::{StatusMonitor, StatusWatcher, SOURCE_LOST_MESSAGE};
pub use process::{ProcessHandle, ProcessRegistry, ShutdownSignals, SpawnOptions};
pub use report::{SelfReport, INSTANCE_ID_ENV, SESSION_ID_ENV, SESSION_STATUS_DIR_ENV};
pub use workspace::{NewWorkspace, WorkspaceManager};
