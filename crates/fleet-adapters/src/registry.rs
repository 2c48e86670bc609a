//! Classifier lookup by worker mode.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_models::AgentMode;

use crate::classifier::{DisabledClassifier, PaneClassifier, RuleClassifier};
use crate::rules;

/// Maps every [`AgentMode`] to a classifier.
///
/// All modes are always covered; swapping one out never touches the status
/// state machine.
///
/// ```
/// use fleet_adapters::ClassifierRegistry;
/// use fleet_models::AgentMode;
///
/// let registry = ClassifierRegistry::new();
/// assert_eq!(registry.for_mode(AgentMode::Codex).name(), "agent");
///
/// let off = ClassifierRegistry::disabled();
/// assert!(off.for_mode(AgentMode::Claude).classify("\u{276F} ").is_none());
/// ```
#[derive(Clone)]
pub struct ClassifierRegistry {
    classifiers: HashMap<AgentMode, Arc<dyn PaneClassifier>>,
}

impl ClassifierRegistry {
    /// Creates a registry with the built-in rule sets.
    pub fn new() -> Self {
        let claude: Arc<dyn PaneClassifier> = Arc::new(RuleClassifier::new("claude", rules::claude()));
        let agent: Arc<dyn PaneClassifier> = Arc::new(RuleClassifier::new("agent", rules::agent()));
        let shell: Arc<dyn PaneClassifier> = Arc::new(RuleClassifier::new("shell", rules::shell()));

        let classifiers = AgentMode::ALL
            .iter()
            .map(|mode| {
                let classifier = match mode {
                    AgentMode::Claude => claude.clone(),
                    AgentMode::Gemini | AgentMode::Codex => agent.clone(),
                    AgentMode::Shell => shell.clone(),
                };
                (*mode, classifier)
            })
            .collect();

        Self { classifiers }
    }

    /// Creates a registry where every mode is disabled.
    pub fn disabled() -> Self {
        let disabled: Arc<dyn PaneClassifier> = Arc::new(DisabledClassifier);
        Self {
            classifiers: AgentMode::ALL
                .iter()
                .map(|mode| (*mode, disabled.clone()))
                .collect(),
        }
    }

    /// Creates the built-in registry, or the disabled one when `enabled` is false.
    pub fn with_enabled(enabled: bool) -> Self {
        if enabled {
            Self::new()
        } else {
            Self::disabled()
        }
    }

    /// Replaces the classifier for one mode.
    pub fn register(&mut self, mode: AgentMode, classifier: Arc<dyn PaneClassifier>) {
        self.classifiers.insert(mode, classifier);
    }

    /// Gets the classifier for a mode.
    pub fn for_mode(&self, mode: AgentMode) -> Arc<dyn PaneClassifier> {
        self.classifiers
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| Arc::new(DisabledClassifier))
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
