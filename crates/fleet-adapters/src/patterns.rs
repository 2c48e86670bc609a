//! Pattern matching utilities for pane text.

use fleet_models::AgentState;
use regex::Regex;

/// A compiled pattern mapped to the state it signals.
#[derive(Debug)]
pub struct Rule {
    /// Human-readable name for this rule.
    pub name: &'static str,
    /// The regex pattern.
    regex: Regex,
    /// State implied when this rule matches.
    pub state: AgentState,
}

impl Rule {
    /// Creates a new rule.
    ///
    /// Rule sets are built from literals, so an invalid pattern is a bug.
    pub fn new(name: &'static str, pattern: &str, state: AgentState) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("Invalid regex pattern"),
            state,
        }
    }

    /// Checks if the rule matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Returns the full line containing the last match, trimmed.
    pub fn matched_line<'a>(&self, text: &'a str) -> Option<&'a str> {
        let m = self.regex.find_iter(text).last()?;
        let start = text[..m.start()].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let end = text[m.end()..]
            .find('\n')
            .map(|i| m.end() + i)
            .unwrap_or(text.len());
        Some(text[start..end].trim())
    }
}

/// Returns the first rule that matches, in declaration order.
pub fn first_match<'a>(text: &str, rules: &'a [Rule]) -> Option<&'a Rule> {
    rules.iter().find(|r| r.matches(text))
}

/// Checks if any rule in the set matches.
pub fn any_match(text: &str, rules: &[Rule]) -> bool {
    rules.iter().any(|r| r.matches(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_matches() {
        let rule = Rule::new("test", r"hello \w+", AgentState::Idle);
        assert!(rule.matches("hello world"));
        assert!(!rule.matches("goodbye world"));
    }

    #[test]
    fn test_matched_line() {
        let rule = Rule::new("confirm", r"(?i)proceed\?", AgentState::Waiting);
        let text = "building\nDo you want to proceed? [y/n]\n";
        assert_eq!(rule.matched_line(text), Some("Do you want to proceed? [y/n]"));
        assert_eq!(rule.matched_line("nothing"), None);
    }

    #[test]
    fn test_first_match_respects_order() {
        let rules = vec![
            Rule::new("a", r"x", AgentState::Working),
            Rule::new("b", r"x", AgentState::Idle),
        ];
        assert_eq!(first_match("x", &rules).unwrap().name, "a");
        assert!(first_match("y", &rules).is_none());
        assert!(any_match("x", &rules));
    }
}
