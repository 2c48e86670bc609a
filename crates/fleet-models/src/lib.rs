//! Core data models for Fleet.
//!
//! Plain data types shared by every Fleet crate: sessions and their status,
//! tracked processes, isolated workspaces, registered instances, and the
//! wire format agents use to report their own status.

pub mod ids;
pub mod instance;
pub mod mode;
pub mod process;
pub mod session;
pub mod status;
pub mod workspace;

pub use ids::SessionId;
pub use instance::{InstanceInfo, InstanceRegistryFile, SessionMetadata, SessionStoreFile};
pub use mode::{AgentMode, ParseModeError};
pub use process::ProcessEntry;
pub use session::Session;
pub use status::{AgentState, ReportedState, SessionStatus, StatusReport, StatusSource, StatusUpdate};
pub use workspace::WorkspaceInfo;
