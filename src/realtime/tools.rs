//! Voice-safe tool policy
//!
//! Gates which tools a realtime session is allowed to invoke and clamps
//! their results to a size a spoken turn can actually use.

use crate::config::ToolPolicyConfig;

/// Tools considered safe for an unattended voice call unless explicitly
/// denied.
const DEFAULT_ALLOW: &[&str] = &["search", "lookup", "get_weather", "get_time", "calculate"];

/// Tools considered unsafe for an unattended voice call unless explicitly
/// allowed.
const DEFAULT_DENY: &[&str] = &[
    "execute_shell",
    "delete_file",
    "send_email",
    "make_payment",
    "transfer_funds",
];

/// Maximum length, in characters, of a tool result relayed back into the
/// conversation. Longer results are truncated with a marker appended.
pub const MAX_TOOL_RESULT_CHARS: usize = 1000;

pub struct ToolPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl ToolPolicy {
    pub fn from_config(config: &ToolPolicyConfig) -> Self {
        let allow = config
            .allow
            .clone()
            .unwrap_or_else(|| DEFAULT_ALLOW.iter().map(|s| s.to_string()).collect());
        let deny = config
            .deny
            .clone()
            .unwrap_or_else(|| DEFAULT_DENY.iter().map(|s| s.to_string()).collect());
        Self { allow, deny }
    }

    /// A denial always wins over an allow entry for the same tool name.
    pub fn is_allowed(&self, tool_name: &str) -> bool {
        if self.deny.iter().any(|d| d == tool_name) {
            return false;
        }
        self.allow.iter().any(|a| a == tool_name)
    }
}

/// Clamps a tool result to [`MAX_TOOL_RESULT_CHARS`] characters so a single
/// tool call can't blow the conversation's token budget.
pub fn clamp_result(text: &str) -> String {
    if text.chars().count() <= MAX_TOOL_RESULT_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    format!("{truncated}... [truncated]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_read_only_tools() {
        let policy = ToolPolicy::from_config(&ToolPolicyConfig::default());
        assert!(policy.is_allowed("search"));
        assert!(!policy.is_allowed("execute_shell"));
    }

    #[test]
    fn unknown_tool_is_denied_by_default() {
        let policy = ToolPolicy::from_config(&ToolPolicyConfig::default());
        assert!(!policy.is_allowed("some_unlisted_tool"));
    }

    #[test]
    fn deny_wins_over_allow_for_same_tool() {
        let config = ToolPolicyConfig {
            allow: Some(vec!["execute_shell".to_string()]),
            deny: Some(vec!["execute_shell".to_string()]),
        };
        let policy = ToolPolicy::from_config(&config);
        assert!(!policy.is_allowed("execute_shell"));
    }

    #[test]
    fn config_override_widens_allow_set() {
        let config = ToolPolicyConfig {
            allow: Some(vec!["custom_tool".to_string()]),
            deny: Some(vec![]),
        };
        let policy = ToolPolicy::from_config(&config);
        assert!(policy.is_allowed("custom_tool"));
    }

    #[test]
    fn clamp_passes_short_text_through() {
        assert_eq!(clamp_result("short"), "short");
    }

    #[test]
    fn clamp_truncates_long_text_with_marker() {
        let long = "x".repeat(MAX_TOOL_RESULT_CHARS + 50);
        let clamped = clamp_result(&long);
        assert!(clamped.ends_with("... [truncated]"));
        assert!(clamped.len() < long.len());
    }
}
