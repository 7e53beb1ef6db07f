//! Lock reason details text
//!
//! Details look like `Attempt #3 failed: <error>`, optionally prefixed with
//! `Upgrade to ModuleSetTag: <tag>` while an upgrade is pending.

use super::types::LockReason;
use regex::Regex;
use std::sync::OnceLock;

const MODULE_SET_TAG_PREFIX: &str = "Upgrade to ModuleSetTag:";

fn attempt_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Attempt #(\d+) failed:.+").expect("static regex"))
}

fn module_set_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Upgrade to ModuleSetTag: (\S+)").expect("static regex"))
}

/// Values recovered from a details string
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockDetails {
    pub attempt: Option<u32>,
    pub module_set_tag: Option<String>,
}

impl LockDetails {
    pub fn parse(details: &str) -> Self {
        let attempt = attempt_pattern()
            .captures(details)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        let module_set_tag = module_set_tag_pattern()
            .captures(details)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        Self {
            attempt,
            module_set_tag,
        }
    }

    pub fn from_lock_reason(lock_reason: Option<&LockReason>) -> Self {
        lock_reason
            .map(|r| Self::parse(&r.details))
            .unwrap_or_default()
    }

    /// Attempt number for the next failure
    pub fn next_attempt(&self) -> u32 {
        self.attempt.map(|a| a.saturating_add(1)).unwrap_or(1)
    }
}

/// Build the details text for a failed attempt
pub fn format_details(module_set_tag: Option<&str>, attempt: u32, error: &str) -> String {
    match module_set_tag {
        Some(tag) if !tag.is_empty() => format!(
            "{} {} Attempt #{} failed: {}",
            MODULE_SET_TAG_PREFIX, tag, attempt, error
        ),
        _ => format!("Attempt #{} failed: {}", attempt, error),
    }
}

/// Details for an upgrade request (`MODULE_UPGRADE`)
pub fn upgrade_details(module_set_tag: &str) -> String {
    format!("{} {}", MODULE_SET_TAG_PREFIX, module_set_tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::LockReasonCategory;

    #[test]
    fn test_parse_attempt_and_tag() {
        let details = LockDetails::parse("Upgrade to ModuleSetTag: tag-b Attempt #4 failed: 503");
        assert_eq!(details.attempt, Some(4));
        assert_eq!(details.module_set_tag.as_deref(), Some("tag-b"));
        assert_eq!(details.next_attempt(), 5);
    }

    #[test]
    fn test_parse_without_attempt() {
        let details = LockDetails::parse("some free text");
        assert_eq!(details, LockDetails::default());
        assert_eq!(details.next_attempt(), 1);
    }

    #[test]
    fn test_format_round_trips_through_parse() {
        let text = format_details(Some("tag-a"), 2, "404 Not Found");
        assert_eq!(text, "Upgrade to ModuleSetTag: tag-a Attempt #2 failed: 404 Not Found");
        let parsed = LockDetails::parse(&text);
        assert_eq!(parsed.attempt, Some(2));
        assert_eq!(parsed.module_set_tag.as_deref(), Some("tag-a"));

        assert_eq!(format_details(None, 1, "x"), "Attempt #1 failed: x");
    }

    #[test]
    fn test_upgrade_details_carry_tag() {
        let reason = LockReason::new(LockReasonCategory::ModuleUpgrade, upgrade_details("tag-z"));
        let parsed = LockDetails::from_lock_reason(Some(&reason));
        assert_eq!(parsed.module_set_tag.as_deref(), Some("tag-z"));
        assert_eq!(parsed.next_attempt(), 1);
    }
}
