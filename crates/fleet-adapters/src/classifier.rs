//! The classifier interface and its rule-based implementation.

use fleet_models::AgentState;

use crate::patterns::{first_match, Rule};

/// Number of trailing lines a rule classifier looks at by default.
pub const DEFAULT_WINDOW: usize = 12;

/// Result of classifying pane text.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Inferred state.
    pub state: AgentState,
    /// Name of the rule that matched.
    pub rule: &'static str,
    /// Prompt line shown to the user, for `Waiting` results.
    pub needs_input: Option<String>,
}

/// Classifies captured pane text into a status.
///
/// Returning `None` means "no opinion"; callers keep the current state.
pub trait PaneClassifier: Send + Sync {
    /// Short identifier, for logs.
    fn name(&self) -> &str;

    /// Classifies recently captured pane text.
    fn classify(&self, text: &str) -> Option<Classification>;
}

/// Returns the last `n` lines of `text`, ignoring trailing blank lines.
///
/// Captured panes are padded with empty rows below the cursor.
pub fn recent_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    let start = end.saturating_sub(n);
    lines[start..end].join("\n")
}

/// Ordered rule list evaluated top-down over the most recent lines.
pub struct RuleClassifier {
    name: &'static str,
    rules: &'static [Rule],
    window: usize,
}

impl RuleClassifier {
    /// Creates a classifier over a static rule set.
    pub fn new(name: &'static str, rules: &'static [Rule]) -> Self {
        Self {
            name,
            rules,
            window: DEFAULT_WINDOW,
        }
    }

    /// Sets how many trailing lines are considered.
    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }
}

impl PaneClassifier for RuleClassifier {
    fn name(&self) -> &str {
        self.name
    }

    fn classify(&self, text: &str) -> Option<Classification> {
        let recent = recent_lines(text, self.window);
        if recent.trim().is_empty() {
            return None;
        }

        let rule = first_match(&recent, self.rules)?;
        let needs_input = if rule.state == AgentState::Waiting {
            rule.matched_line(&recent)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
        } else {
            None
        };

        Some(Classification {
            state: rule.state,
            rule: rule.name,
            needs_input,
        })
    }
}

/// Classifier that never has an opinion; used when heuristics are off.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledClassifier;

impl PaneClassifier for DisabledClassifier {
    fn name(&self) -> &str {
        "disabled"
    }

    fn classify(&self, _text: &str) -> Option<Classification> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules;

    #[test]
    fn test_recent_lines_skips_padding() {
        let text = "a\nb\nc\n\n\n   \n";
        assert_eq!(recent_lines(text, 2), "b\nc");
        assert_eq!(recent_lines(text, 10), "a\nb\nc");
        assert_eq!(recent_lines("\n\n", 5), "");
    }

    #[test]
    fn test_window_hides_old_lines() {
        let classifier = RuleClassifier::new("claude", rules::claude()).with_window(2);
        // The spinner scrolled out of the window; only the prompt is visible
        let text = "\u{273B} Thinking\u{2026}\nfoo\n\u{276F} \n? for shortcuts\n";
        let found = classifier.classify(text).unwrap();
        assert_eq!(found.state, AgentState::Idle);
    }

    #[test]
    fn test_waiting_carries_prompt_line() {
        let classifier = RuleClassifier::new("claude", rules::claude());
        let text = "Edit src/lib.rs\nDo you want to proceed?\n\u{276F} 1. Yes\n  2. No\n\n";
        let found = classifier.classify(text).unwrap();
        assert_eq!(found.state, AgentState::Waiting);
        assert_eq!(found.rule, "permission_prompt");
        assert_eq!(found.needs_input.as_deref(), Some("Do you want to proceed?"));
    }

    #[test]
    fn test_blank_capture_has_no_opinion() {
        let classifier = RuleClassifier::new("shell", rules::shell());
        assert!(classifier.classify("\n\n").is_none());
    }

    #[test]
    fn test_disabled() {
        assert!(DisabledClassifier.classify("\u{276F} ").is_none());
        assert_eq!(DisabledClassifier.name(), "disabled");
    }
}
