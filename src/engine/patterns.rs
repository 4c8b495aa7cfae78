// Deterministic pattern matchers - PII detection and custom regex rules

use crate::core::models::{FilterRule, RuleAction, ValidationResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Recognized PII types bound to fixed detection patterns
///
/// Unknown type names are ignored (allow).
pub static PII_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "email",
            Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
        ),
        (
            "phone",
            Regex::new(r"\+?1?[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap(),
        ),
        ("ssn", Regex::new(r"\d{3}-\d{2}-\d{4}").unwrap()),
        (
            "credit_card",
            Regex::new(r"\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}").unwrap(),
        ),
        (
            "ip_address",
            Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap(),
        ),
        (
            "password",
            Regex::new(r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+").unwrap(),
        ),
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key|apikey|access[_-]?token)\s*[:=]\s*\S+").unwrap(),
        ),
        ("url", Regex::new(r"https?://\S+").unwrap()),
    ]
});

fn pii_pattern(pii_type: &str) -> Option<&'static Regex> {
    PII_PATTERNS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(pii_type))
        .map(|(_, regex)| regex)
}

/// Apply a PII rule to the text. `None` means the rule did not match.
pub fn validate_pii_rule(
    rule: &FilterRule,
    policy_id: &str,
    text: &str,
) -> Option<ValidationResult> {
    let pii_type = rule.pattern.as_deref()?;
    let regex = pii_pattern(pii_type)?;

    if !regex.is_match(text) {
        return None;
    }

    match rule.action {
        RuleAction::Block => {
            let metadata: HashMap<String, Value> = HashMap::from([
                ("policy_id".to_string(), Value::String(policy_id.to_string())),
                ("rule_type".to_string(), Value::String("pii".to_string())),
                (
                    "pii_type".to_string(),
                    Value::String(pii_type.to_string()),
                ),
            ]);
            Some(ValidationResult::blocked(
                format!("PII detected: {}", pii_type),
                metadata,
            ))
        }
        RuleAction::Redact => {
            let replacement = format!("[{}_REDACTED]", pii_type.to_uppercase());
            let redacted = regex.replace_all(text, replacement.as_str()).to_string();
            Some(ValidationResult::redacted(redacted))
        }
    }
}

/// Apply a custom regex rule to the text. Patterns compile
/// case-insensitively; invalid patterns allow (logged).
pub fn validate_regex_rule(
    rule: &FilterRule,
    policy_id: &str,
    text: &str,
) -> Option<ValidationResult> {
    let pattern = rule.pattern.as_deref()?;

    let regex = match Regex::new(&format!("(?i){}", pattern)) {
        Ok(regex) => regex,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid regex rule, allowing");
            return None;
        }
    };

    if !regex.is_match(text) {
        return None;
    }

    match rule.action {
        RuleAction::Block => {
            let metadata: HashMap<String, Value> = HashMap::from([
                ("policy_id".to_string(), Value::String(policy_id.to_string())),
                ("rule_type".to_string(), Value::String("regex".to_string())),
            ]);
            Some(ValidationResult::blocked(
                format!("Content matches blocked pattern: {}", pattern),
                metadata,
            ))
        }
        RuleAction::Redact => {
            let redacted = regex.replace_all(text, "[REDACTED]").to_string();
            Some(ValidationResult::redacted(redacted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::FilterType;

    fn pii_rule(pii_type: &str, action: RuleAction) -> FilterRule {
        FilterRule {
            filter_type: FilterType::Pii,
            pattern: Some(pii_type.to_string()),
            action,
            config: HashMap::new(),
        }
    }

    fn regex_rule(pattern: &str, action: RuleAction) -> FilterRule {
        FilterRule {
            filter_type: FilterType::Regex,
            pattern: Some(pattern.to_string()),
            action,
            config: HashMap::new(),
        }
    }

    #[test]
    fn test_email_redaction() {
        let rule = pii_rule("email", RuleAction::Redact);
        let result =
            validate_pii_rule(&rule, "MCPGuardrails", "Contact me at alice@example.com").unwrap();
        assert!(result.allowed);
        assert!(result.modified);
        assert_eq!(
            result.modified_payload.as_deref(),
            Some("Contact me at [EMAIL_REDACTED]")
        );
    }

    #[test]
    fn test_ssn_block() {
        let rule = pii_rule("ssn", RuleAction::Block);
        let result = validate_pii_rule(&rule, "MCPGuardrails", "ssn is 123-45-6789").unwrap();
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some("PII detected: ssn"));
        assert_eq!(
            result.metadata.get("pii_type").and_then(|v| v.as_str()),
            Some("ssn")
        );
        assert_eq!(
            result.metadata.get("policy_id").and_then(|v| v.as_str()),
            Some("MCPGuardrails")
        );
    }

    #[test]
    fn test_pii_type_is_case_insensitive() {
        let rule = pii_rule("EMAIL", RuleAction::Block);
        assert!(validate_pii_rule(&rule, "p", "bob@example.org").is_some());
    }

    #[test]
    fn test_unknown_pii_type_allows() {
        let rule = pii_rule("favorite_color", RuleAction::Block);
        assert!(validate_pii_rule(&rule, "p", "anything at all").is_none());
    }

    #[test]
    fn test_no_match_allows() {
        let rule = pii_rule("email", RuleAction::Block);
        assert!(validate_pii_rule(&rule, "p", "no addresses here").is_none());
    }

    #[test]
    fn test_credit_card_detection() {
        let rule = pii_rule("credit_card", RuleAction::Redact);
        for text in [
            "card 4111-1111-1111-1111 thanks",
            "card 4111 1111 1111 1111 thanks",
            "card 4111111111111111 thanks",
        ] {
            let result = validate_pii_rule(&rule, "p", text).unwrap();
            assert_eq!(
                result.modified_payload.as_deref(),
                Some("card [CREDIT_CARD_REDACTED] thanks")
            );
        }
    }

    #[test]
    fn test_api_key_and_password_detection() {
        let key_rule = pii_rule("api_key", RuleAction::Block);
        assert!(validate_pii_rule(&key_rule, "p", "api_key=sk-123456").is_some());
        assert!(validate_pii_rule(&key_rule, "p", "access-token: abcd").is_some());

        let pwd_rule = pii_rule("password", RuleAction::Block);
        assert!(validate_pii_rule(&pwd_rule, "p", "password: hunter2").is_some());
        assert!(validate_pii_rule(&pwd_rule, "p", "PWD=secret").is_some());
    }

    #[test]
    fn test_regex_block() {
        let rule = regex_rule("internal-\\d+", RuleAction::Block);
        let result = validate_regex_rule(&rule, "MCPGuardrails", "doc INTERNAL-42").unwrap();
        assert!(!result.allowed);
        assert!(result.reason.unwrap().contains("internal-\\d+"));
    }

    #[test]
    fn test_regex_redact() {
        let rule = regex_rule("secret-\\w+", RuleAction::Redact);
        let result = validate_regex_rule(&rule, "p", "the secret-alpha value").unwrap();
        assert_eq!(
            result.modified_payload.as_deref(),
            Some("the [REDACTED] value")
        );
    }

    #[test]
    fn test_invalid_regex_allows() {
        let rule = regex_rule("([unclosed", RuleAction::Block);
        assert!(validate_regex_rule(&rule, "p", "anything").is_none());
    }
}
