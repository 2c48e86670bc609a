//! Fleet Core - shared configuration for all Fleet crates.
//!
//! - **config**: state directory layout and environment overrides

pub mod config;

pub use config::{
    ensure_state_dir, env_file, instance_registry_file, load_env, logs_dir, session_store_file,
    sessions_dir, state_dir, status_dir, status_root, worktree_root,
};
