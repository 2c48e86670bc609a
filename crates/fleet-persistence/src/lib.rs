//! Persistence layer for Fleet.
//!
//! Independent CLI invocations share state only through files. Every write
//! is a whole-file read-modify-write made crash-safe with an atomic rename;
//! concurrent writers race last-writer-wins.
//!
//! # Example
//!
//! ```no_run
//! use fleet_persistence::{InstanceRegistry, SessionStore};
//!
//! let registry = InstanceRegistry::new("/home/user/.fleet/instances.json");
//! let instance = registry.register_instance("/home/user/code/widget", 2).unwrap();
//!
//! let store = SessionStore::for_instance(&instance.id);
//! let sessions = store.load().unwrap();
//! println!("{} has {} sessions", instance.id, sessions.len());
//! ```

pub mod atomic;
pub mod error;
pub mod instance_registry;
pub mod session_store;

pub use error::{PersistenceError, Result};
pub use instance_registry::{derive_instance_id, InstanceRegistry};
pub use session_store::SessionStore;
