// Core domain models - policy shapes, validation context and results

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Guardrail policy as authored in the policy store (wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailPolicy {
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub apply_on_request: bool,
    #[serde(default)]
    pub apply_on_response: bool,
    #[serde(default)]
    pub harmful_categories: bool,
    #[serde(default)]
    pub prompt_attacks: bool,
    #[serde(default)]
    pub prompt_attacks_threshold: Option<f64>,
    #[serde(default)]
    pub denied_topics: Vec<DeniedTopic>,
    #[serde(default)]
    pub pii_types: Vec<PiiEntry>,
    #[serde(default)]
    pub regex_patterns: Vec<RegexEntry>,
}

/// A denied topic with its sample phrases (wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedTopic {
    pub topic: String,
    #[serde(default)]
    pub sample_phrases: Vec<String>,
}

/// A PII type entry (wire shape). Behavior is "block" or "mask".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiiEntry {
    #[serde(rename = "type")]
    pub pii_type: String,
    #[serde(default)]
    pub behavior: Option<String>,
}

/// A regex pattern entry (wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexEntry {
    pub pattern: String,
    #[serde(default)]
    pub action: Option<RuleAction>,
}

/// Filter rule type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    HarmfulCategories,
    PromptAttacks,
    BanTopics,
    BanSubstrings,
    DeniedTopics,
    Pii,
    Regex,
    Audit,
    ComponentMetadata,
}

/// Action taken when a rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Redact,
}

/// A single filter rule inside a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    pub filter_type: FilterType,
    #[serde(default)]
    pub pattern: Option<String>,
    pub action: RuleAction,
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

/// Internal policy shape, derived from a GuardrailPolicy at fetch time
#[derive(Debug, Clone)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub default_action: RuleAction,
    pub request_rules: Vec<FilterRule>,
    pub response_rules: Vec<FilterRule>,
}

/// Per-resource audit decision fetched from the policy store (wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPolicy {
    pub resource_name: String,
    pub remarks: String,
    #[serde(default)]
    pub marked_by: Option<String>,
    #[serde(default)]
    pub approval_conditions: Option<ApprovalConditions>,
}

/// Conditions attached to a conditionally-approved resource
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalConditions {
    #[serde(default)]
    pub expires_at: i64,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub allowed_ip_ranges: Vec<String>,
    #[serde(default)]
    pub whitelisted_endpoints: Vec<String>,
}

/// Rate-limit identifier components, resolved in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdentifierType {
    Ip,
    User,
    Tool,
}

/// Sliding-window rate-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub limit: u64,
    pub window_seconds: u64,
    pub identifier_types: Vec<IdentifierType>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window_seconds: 300,
            identifier_types: vec![IdentifierType::Ip, IdentifierType::Tool],
        }
    }
}

/// Stored rate-limit counter cell. `reset_at` is unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitCell {
    pub count: u64,
    pub reset_at: i64,
}

/// Everything a single validation call needs, constructed per call.
///
/// Mutated only by the orchestrator attaching a redacted payload.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub client_ip: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    pub request_headers: Option<Value>,
    pub response_headers: Option<Value>,
    pub status_code: Option<u16>,
    pub request_payload: Option<String>,
    pub response_payload: Option<String>,
    pub mcp_server_name: Option<String>,
    pub policies: Vec<Policy>,
    pub audit_policies: HashMap<String, AuditPolicy>,
    pub has_audit_rules: bool,
    pub rate_limit: RateLimitConfig,
}

/// Outcome of a validator (or of the whole pipeline)
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub allowed: bool,
    pub modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_response: Option<Value>,
}

impl ValidationResult {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            modified: false,
            modified_payload: None,
            reason: None,
            metadata: HashMap::new(),
            blocked_response: None,
        }
    }

    pub fn redacted(payload: String) -> Self {
        Self {
            allowed: true,
            modified: true,
            modified_payload: Some(payload),
            reason: None,
            metadata: HashMap::new(),
            blocked_response: None,
        }
    }

    pub fn blocked(reason: impl Into<String>, metadata: HashMap<String, Value>) -> Self {
        Self {
            allowed: false,
            modified: false,
            modified_payload: None,
            reason: Some(reason.into()),
            metadata,
            blocked_response: None,
        }
    }

    /// Convenience for the common single-key metadata case
    pub fn blocked_with_policy(reason: impl Into<String>, policy_id: &str) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("policy_id".to_string(), Value::String(policy_id.to_string()));
        Self::blocked(reason, metadata)
    }
}

/// Build the JSON-RPC error envelope returned for blocked traffic
pub fn blocked_response(reason: &str, original_payload: &str) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "error": {
            "code": -32000,
            "message": "Request blocked by security policy",
            "data": {
                "reason": reason,
                "original_payload": original_payload,
            }
        }
    })
}

/// Canonical malicious-event record POSTed to the threat backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaliciousEvent {
    pub actor: String,
    pub filter_id: String,
    pub detected_at: String,
    pub latest_api_ip: String,
    pub latest_api_endpoint: String,
    pub latest_api_method: String,
    pub latest_api_collection_id: i64,
    pub latest_api_payload: String,
    pub event_type: String,
    pub category: String,
    pub sub_category: String,
    pub severity: String,
    #[serde(rename = "type")]
    pub detection_type: String,
    pub metadata: HashMap<String, String>,
}

/// One element of an ingestion batch (wire shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub dest_ip: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub request_headers: Option<String>,
    #[serde(default)]
    pub response_headers: Option<String>,
    #[serde(default)]
    pub request_payload: Option<String>,
    #[serde(default)]
    pub response_payload: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Per-item result of batch validation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub request_allowed: bool,
    pub request_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_modified_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_error: Option<String>,
    pub response_allowed: bool,
    pub response_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modified_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_error: Option<String>,
}
