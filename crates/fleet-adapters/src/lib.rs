//! Pane-text status classification.
//!
//! When a worker has not reported its own status, Fleet reads the last lines
//! visible in its pane and classifies them. Each [`AgentMode`] has an ordered
//! rule set; rules are evaluated top-down and the first match wins.
//! "Actively computing" rules always precede prompt rules, so a spinner above
//! a prompt reads as working.
//!
//! # Example
//!
//! ```
//! use fleet_adapters::ClassifierRegistry;
//! use fleet_models::{AgentMode, AgentState};
//!
//! let registry = ClassifierRegistry::new();
//! let classifier = registry.for_mode(AgentMode::Shell);
//!
//! let found = classifier.classify("make: done\nuser@host:~/code$ ").unwrap();
//! assert_eq!(found.state, AgentState::Idle);
//! ```
//!
//! [`AgentMode`]: fleet_models::AgentMode

pub mod classifier;
pub mod patterns;
pub mod registry;
pub mod rules;

pub use classifier::{recent_lines, Classification, DisabledClassifier, PaneClassifier, RuleClassifier};
pub use patterns::Rule;
pub use registry::ClassifierRegistry;
