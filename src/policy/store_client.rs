// Policy store client - fetches and normalises guardrail and audit policies

use crate::core::errors::GatewayError;
use crate::core::models::{
    AuditPolicy, FilterRule, FilterType, GuardrailPolicy, Policy, RuleAction,
};
use moka::future::Cache;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fixed internal id for policies derived from MCP guardrails
pub const GUARDRAIL_POLICY_ID: &str = "MCPGuardrails";

const GUARDRAIL_CACHE_KEY: &str = "guardrail_policies";
const AUDIT_CACHE_KEY: &str = "audit_policies";

/// Client for the remote policy store
///
/// Both endpoints take the raw token in the Authorization header (no
/// scheme prefix). Responses are cached for a short TTL so per-item batch
/// validation does not hammer the backend.
pub struct PolicyStoreClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    policy_cache: Cache<&'static str, Arc<Vec<Policy>>>,
    audit_cache: Cache<&'static str, Arc<HashMap<String, AuditPolicy>>>,
}

impl PolicyStoreClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let base_url = base_url.trim_end_matches('/').to_string();

        Self {
            client,
            base_url,
            token,
            policy_cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(1)
                .build(),
            audit_cache: Cache::builder()
                .time_to_live(Duration::from_secs(60))
                .max_capacity(1)
                .build(),
        }
    }

    /// Fetch guardrail policies and translate them to the internal shape
    ///
    /// Failures surface to the caller; the validation entry points cannot
    /// run without a policy set.
    pub async fn fetch_guardrail_policies(&self) -> Result<Arc<Vec<Policy>>, GatewayError> {
        if let Some(cached) = self.policy_cache.get(GUARDRAIL_CACHE_KEY).await {
            return Ok(cached);
        }

        let url = format!("{}/api/fetchGuardrailPolicies", self.base_url);
        let body = self.post_json(&url, json!({})).await.map_err(|e| {
            GatewayError::PolicyFetch(format!("fetchGuardrailPolicies failed: {}", e))
        })?;

        let raw_policies = extract_policy_array(&body);
        let mut policies = Vec::with_capacity(raw_policies.len());
        for raw in raw_policies {
            match serde_json::from_value::<GuardrailPolicy>(raw.clone()) {
                Ok(gp) => policies.push(translate_guardrail_policy(&gp)),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed guardrail policy");
                }
            }
        }

        info!(count = policies.len(), "Guardrail policies fetched");

        let policies = Arc::new(policies);
        self.policy_cache
            .insert(GUARDRAIL_CACHE_KEY, Arc::clone(&policies))
            .await;
        Ok(policies)
    }

    /// Fetch audit policies keyed by lowercased resource name
    ///
    /// Degrades to an empty map on failure - audit enforcement is best
    /// effort when the backend is unreachable.
    pub async fn fetch_audit_policies(&self) -> Arc<HashMap<String, AuditPolicy>> {
        if let Some(cached) = self.audit_cache.get(AUDIT_CACHE_KEY).await {
            return cached;
        }

        let url = format!("{}/api/fetchMcpAuditInfo", self.base_url);
        let body = match self
            .post_json(
                &url,
                json!({"remarksList": ["Conditionally Approved", "Rejected"]}),
            )
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Audit policy fetch failed, continuing without audit rules");
                return Arc::new(HashMap::new());
            }
        };

        let mut map = HashMap::new();
        for raw in extract_audit_array(&body) {
            match serde_json::from_value::<AuditPolicy>(raw.clone()) {
                Ok(policy) => {
                    map.insert(policy.resource_name.to_lowercase(), policy);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping malformed audit policy");
                }
            }
        }

        info!(count = map.len(), "Audit policies fetched");

        let map = Arc::new(map);
        self.audit_cache
            .insert(AUDIT_CACHE_KEY, Arc::clone(&map))
            .await;
        map
    }

    async fn post_json(&self, url: &str, body: Value) -> Result<Value, String> {
        let mut request = self.client.post(url).json(&body);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, text));
        }

        response
            .json()
            .await
            .map_err(|e| format!("invalid JSON response: {}", e))
    }
}

/// Locate the guardrail policy list inside the response body
fn extract_policy_array(body: &Value) -> Vec<Value> {
    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    if let Some(arr) = body.get("guardrailPolicies").and_then(|v| v.as_array()) {
        return arr.clone();
    }
    Vec::new()
}

/// Locate the audit info list inside the response body
fn extract_audit_array(body: &Value) -> Vec<Value> {
    if let Some(arr) = body.as_array() {
        return arr.clone();
    }
    for key in ["auditInfoList", "mcpAuditInfos"] {
        if let Some(arr) = body.get(key).and_then(|v| v.as_array()) {
            return arr.clone();
        }
    }
    Vec::new()
}

/// Translate an authoring-shape guardrail policy into the internal shape
///
/// Content-filter rules apply to requests only; topic, PII and regex rules
/// follow the policy's apply-on-request/response flags.
pub fn translate_guardrail_policy(gp: &GuardrailPolicy) -> Policy {
    let mut request_rules = Vec::new();
    let mut response_rules = Vec::new();

    if gp.harmful_categories {
        request_rules.push(FilterRule {
            filter_type: FilterType::HarmfulCategories,
            pattern: None,
            action: RuleAction::Block,
            config: HashMap::new(),
        });
    }

    if gp.prompt_attacks {
        request_rules.push(FilterRule {
            filter_type: FilterType::PromptAttacks,
            pattern: None,
            action: RuleAction::Block,
            config: HashMap::from([("threshold".to_string(), json!(0.5))]),
        });
    }

    if !gp.denied_topics.is_empty() {
        let topics: Vec<&str> = gp.denied_topics.iter().map(|t| t.topic.as_str()).collect();
        let substrings: Vec<&str> = gp
            .denied_topics
            .iter()
            .flat_map(|t| t.sample_phrases.iter().map(|p| p.as_str()))
            .collect();

        let topic_rule = FilterRule {
            filter_type: FilterType::BanTopics,
            pattern: None,
            action: RuleAction::Block,
            config: HashMap::from([("topics".to_string(), json!(topics))]),
        };
        let substring_rule = FilterRule {
            filter_type: FilterType::BanSubstrings,
            pattern: None,
            action: RuleAction::Block,
            config: HashMap::from([("substrings".to_string(), json!(substrings))]),
        };

        push_per_direction(gp, &mut request_rules, &mut response_rules, topic_rule);
        push_per_direction(gp, &mut request_rules, &mut response_rules, substring_rule);
    }

    for pii in &gp.pii_types {
        let masks = pii
            .behavior
            .as_deref()
            .map(|b| b.eq_ignore_ascii_case("mask"))
            .unwrap_or(false);
        let rule = FilterRule {
            filter_type: FilterType::Pii,
            pattern: Some(pii.pii_type.clone()),
            action: if masks {
                RuleAction::Redact
            } else {
                RuleAction::Block
            },
            config: HashMap::new(),
        };
        push_per_direction(gp, &mut request_rules, &mut response_rules, rule);
    }

    for regex in &gp.regex_patterns {
        let rule = FilterRule {
            filter_type: FilterType::Regex,
            pattern: Some(regex.pattern.clone()),
            action: regex.action.unwrap_or(RuleAction::Block),
            config: HashMap::new(),
        };
        push_per_direction(gp, &mut request_rules, &mut response_rules, rule);
    }

    Policy {
        id: GUARDRAIL_POLICY_ID.to_string(),
        name: gp.name.clone(),
        active: gp.active,
        default_action: RuleAction::Block,
        request_rules,
        response_rules,
    }
}

fn push_per_direction(
    gp: &GuardrailPolicy,
    request_rules: &mut Vec<FilterRule>,
    response_rules: &mut Vec<FilterRule>,
    rule: FilterRule,
) {
    if gp.apply_on_request {
        request_rules.push(rule.clone());
    }
    if gp.apply_on_response {
        response_rules.push(rule);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy() -> GuardrailPolicy {
        serde_json::from_value(json!({
            "name": "default",
            "active": true,
            "applyOnRequest": true,
            "applyOnResponse": true,
            "harmfulCategories": true,
            "promptAttacks": true,
            "deniedTopics": [
                {"topic": "weapons", "samplePhrases": ["how to build a bomb"]},
                {"topic": "malware", "samplePhrases": ["write ransomware", "keylogger code"]}
            ],
            "piiTypes": [
                {"type": "email", "behavior": "mask"},
                {"type": "ssn", "behavior": "block"}
            ],
            "regexPatterns": [{"pattern": "internal-\\d+"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_translate_content_filters_are_request_only() {
        let policy = translate_guardrail_policy(&sample_policy());

        assert_eq!(policy.id, GUARDRAIL_POLICY_ID);
        assert!(policy.active);

        let request_types: Vec<FilterType> = policy
            .request_rules
            .iter()
            .map(|r| r.filter_type)
            .collect();
        assert!(request_types.contains(&FilterType::HarmfulCategories));
        assert!(request_types.contains(&FilterType::PromptAttacks));

        let response_types: Vec<FilterType> = policy
            .response_rules
            .iter()
            .map(|r| r.filter_type)
            .collect();
        assert!(!response_types.contains(&FilterType::HarmfulCategories));
        assert!(!response_types.contains(&FilterType::PromptAttacks));
    }

    #[test]
    fn test_translate_prompt_attacks_threshold() {
        let policy = translate_guardrail_policy(&sample_policy());
        let rule = policy
            .request_rules
            .iter()
            .find(|r| r.filter_type == FilterType::PromptAttacks)
            .unwrap();
        assert_eq!(rule.config.get("threshold"), Some(&json!(0.5)));
        assert_eq!(rule.action, RuleAction::Block);
    }

    #[test]
    fn test_translate_denied_topics_aggregates() {
        let policy = translate_guardrail_policy(&sample_policy());

        let topics_rule = policy
            .request_rules
            .iter()
            .find(|r| r.filter_type == FilterType::BanTopics)
            .unwrap();
        assert_eq!(
            topics_rule.config.get("topics"),
            Some(&json!(["weapons", "malware"]))
        );

        let substrings_rule = policy
            .request_rules
            .iter()
            .find(|r| r.filter_type == FilterType::BanSubstrings)
            .unwrap();
        assert_eq!(
            substrings_rule.config.get("substrings"),
            Some(&json!([
                "how to build a bomb",
                "write ransomware",
                "keylogger code"
            ]))
        );
    }

    #[test]
    fn test_translate_pii_behavior() {
        let policy = translate_guardrail_policy(&sample_policy());

        let pii_rules: Vec<&FilterRule> = policy
            .request_rules
            .iter()
            .filter(|r| r.filter_type == FilterType::Pii)
            .collect();
        assert_eq!(pii_rules.len(), 2);
        assert_eq!(pii_rules[0].pattern.as_deref(), Some("email"));
        assert_eq!(pii_rules[0].action, RuleAction::Redact);
        assert_eq!(pii_rules[1].pattern.as_deref(), Some("ssn"));
        assert_eq!(pii_rules[1].action, RuleAction::Block);
    }

    #[test]
    fn test_translate_regex_defaults_to_block() {
        let policy = translate_guardrail_policy(&sample_policy());
        let rule = policy
            .request_rules
            .iter()
            .find(|r| r.filter_type == FilterType::Regex)
            .unwrap();
        assert_eq!(rule.pattern.as_deref(), Some("internal-\\d+"));
        assert_eq!(rule.action, RuleAction::Block);
    }

    #[test]
    fn test_apply_on_response_mirrors_rules() {
        let policy = translate_guardrail_policy(&sample_policy());
        // pii + regex + banTopics + banSubstrings apply to both directions
        assert_eq!(policy.response_rules.len(), 5);
        assert_eq!(policy.request_rules.len(), 7);
    }
}
