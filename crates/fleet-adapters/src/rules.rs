//! Built-in rule sets.
//!
//! Every set lists "actively computing" rules first, then input prompts,
//! then idle prompts. The order is significant: the first match wins.

use std::sync::OnceLock;

use fleet_models::AgentState;

use crate::patterns::Rule;

/// Rules tuned to Claude Code's terminal UI.
pub fn claude() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Working
            Rule::new("interrupt_hint", r"(?i)esc to interrupt", AgentState::Working),
            Rule::new(
                "spinner",
                r"(?m)^\s*[\u{2733}\u{2736}\u{273B}\u{273D}\u{2722}\u{00B7}]\s+\w+\u{2026}",
                AgentState::Working,
            ),
            Rule::new(
                "thinking",
                r"(?i)\(thinking\)|thinking(\.\.\.|\u{2026})",
                AgentState::Working,
            ),
            // Waiting
            Rule::new(
                "permission_prompt",
                r"(?i)do you want to (proceed|make this edit|create|run|allow)",
                AgentState::Waiting,
            ),
            Rule::new("menu_choice", r"(?m)^\s*[\u{276F}>]\s*1\.\s+Yes", AgentState::Waiting),
            Rule::new(
                "confirm",
                r"(?i)\b(confirm|proceed|continue)\s*\?\s*(\[y/n\])?",
                AgentState::Waiting,
            ),
            Rule::new(
                "awaiting_input",
                r"(?i)(waiting for|awaiting|requires?) (input|response|confirmation)",
                AgentState::Waiting,
            ),
            // Idle
            Rule::new("prompt", r"(?m)^\s*(\u{2502}\s*)?\u{276F}\s*$", AgentState::Idle),
            Rule::new("shortcuts_hint", r"\? for shortcuts", AgentState::Idle),
            Rule::new("bare_prompt", r"(?m)^>\s*$", AgentState::Idle),
            Rule::new("idle_marker", r"\[IDLE\]", AgentState::Idle),
        ]
    })
}

/// Rules shared by the other interactive agents (Gemini, Codex).
pub fn agent() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Working
            Rule::new("interrupt_hint", r"(?i)esc to (interrupt|cancel)", AgentState::Working),
            Rule::new("braille_spinner", r"(?m)^\s*[\u{2800}-\u{28FF}]", AgentState::Working),
            Rule::new("working_timer", r"(?i)\bworking\s*\(\d+s", AgentState::Working),
            // Waiting
            Rule::new(
                "approval",
                r"(?i)(allow (once|always)|approve|apply this change)\b",
                AgentState::Waiting,
            ),
            Rule::new(
                "confirm",
                r"(?i)\b(confirm|proceed|continue)\s*\?\s*(\[y/n\])?",
                AgentState::Waiting,
            ),
            Rule::new(
                "awaiting_input",
                r"(?i)(waiting for|awaiting|requires?) (input|response|confirmation)",
                AgentState::Waiting,
            ),
            // Idle
            Rule::new("prompt", r"(?m)^\s*[>\u{276F}\u{203A}]\s*$", AgentState::Idle),
            Rule::new("message_hint", r"(?i)type your message", AgentState::Idle),
            Rule::new("idle_marker", r"\[IDLE\]", AgentState::Idle),
        ]
    })
}

/// Rules for plain shells.
///
/// Shell output scrolls, so working and input rules only look at the final
/// line; earlier build output above a fresh prompt means idle.
pub fn shell() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            // Working
            Rule::new("progress", r"\d+%[^\n]*\z", AgentState::Working),
            Rule::new(
                "long_running",
                r"(?i)(compiling|building|downloading|fetching|installing|running)[^\n]*\z",
                AgentState::Working,
            ),
            // Waiting
            Rule::new("yes_no", r"(?i)[\[(]y/n[\])]\s*\??\s*\z", AgentState::Waiting),
            Rule::new("password", r"(?i)(password|passphrase)[^\n]*:\s*\z", AgentState::Waiting),
            // Idle
            Rule::new("ps1_prompt", r"\w+[@:~][^$#%>\n]*[$#%>]\s*\z", AgentState::Idle),
            Rule::new("bash_version", r"bash-\d+\.\d+[$#]\s*\z", AgentState::Idle),
            Rule::new("bare_prompt", r"(?m)^\s*[$#%>]\s*\z", AgentState::Idle),
        ]
    })
}
