// Metadata auditor - LLM-backed review of tools/list responses

use crate::core::models::ValidationContext;
use crate::reporting::threat::ThreatReporter;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub const COMPONENT_POLICY_ID: &str = "MCPMaliciousComponent";

/// Tools whose malicious-match score exceeds this are reported
pub const MALICIOUS_SCORE_THRESHOLD: f64 = 0.75;
/// Tools whose name/description coherence falls below this are reported
pub const NAME_MATCH_THRESHOLD: f64 = 0.7;

const MAX_CONCURRENT_AUDITS: usize = 5;
const MAX_SCHEMA_DEPTH: usize = 5;

/// Verdict parsed out of the LLM response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolVerdict {
    #[serde(default)]
    pub is_malicious: bool,
    #[serde(default)]
    pub malicious_match_score: f64,
    #[serde(default = "default_match_score")]
    pub tool_name_description_match_score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_match_score() -> f64 {
    1.0
}

impl ToolVerdict {
    pub fn exceeds_thresholds(&self) -> bool {
        self.malicious_match_score > MALICIOUS_SCORE_THRESHOLD
            || self.tool_name_description_match_score < NAME_MATCH_THRESHOLD
    }
}

/// Walks tool descriptors in a tools/list response, scores each with the
/// LLM endpoint, and reports the ones exceeding thresholds. All failures
/// are swallowed per tool; the auditor never affects the request path.
pub struct MetadataAuditor {
    client: Client,
    base_url: String,
    token: Option<String>,
    reporter: Arc<ThreatReporter>,
}

impl MetadataAuditor {
    pub fn new(base_url: String, token: Option<String>, reporter: Arc<ThreatReporter>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            reporter,
        }
    }

    /// Fire-and-forget audit of a tools/list response
    pub fn audit_detached(self: &Arc<Self>, ctx: ValidationContext) {
        let auditor = Arc::clone(self);
        tokio::spawn(async move {
            auditor.audit_tools_list(&ctx).await;
        });
    }

    /// Score every tool descriptor, at most five in flight at a time
    pub async fn audit_tools_list(&self, ctx: &ValidationContext) {
        let response: Value = match ctx
            .response_payload
            .as_deref()
            .and_then(|p| serde_json::from_str(p).ok())
        {
            Some(v) => v,
            None => return,
        };

        let tools = match response
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(|t| t.as_array())
        {
            Some(tools) if !tools.is_empty() => tools.clone(),
            _ => return,
        };

        info!(count = tools.len(), "Auditing tool metadata");

        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_AUDITS));
        let audits = tools.iter().map(|tool| {
            let semaphore = Arc::clone(&semaphore);
            let response = response.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                self.audit_tool(ctx, &response, tool).await;
                Some(())
            }
        });
        futures::future::join_all(audits).await;
    }

    async fn audit_tool(&self, ctx: &ValidationContext, response: &Value, tool: &Value) {
        let name = tool.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let description = tool
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("");

        let prompt = build_audit_prompt(name, description, tool.get("inputSchema"));

        let verdict = match self.score_tool(&prompt).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool metadata scoring failed");
                return;
            }
        };

        debug!(
            tool = %name,
            malicious = verdict.is_malicious,
            malicious_score = verdict.malicious_match_score,
            name_match_score = verdict.tool_name_description_match_score,
            "Tool metadata scored"
        );

        if !verdict.exceeds_thresholds() {
            return;
        }

        info!(
            tool = %name,
            reason = verdict.reason.as_deref().unwrap_or(""),
            "Tool metadata exceeds malicious thresholds, reporting"
        );

        let endpoint = format!(
            "{}/tools/list/{}",
            ctx.endpoint.as_deref().unwrap_or("/mcp/unknown"),
            name
        );
        let filtered = filtered_response(response, tool);
        let event = self.reporter.build_event(
            COMPONENT_POLICY_ID,
            ctx,
            Some(endpoint),
            Some(filtered.to_string()),
        );
        self.reporter.report(event).await;
    }

    async fn score_tool(&self, prompt: &str) -> Result<ToolVerdict, String> {
        let url = format!("{}/api/getLLMResponseV2", self.base_url);
        let body = json!({
            "llmPayload": {
                "temperature": 0.1,
                "top_p": 0.9,
                "max_tokens": 10000,
                "frequency_penalty": 0,
                "presence_penalty": 0.6,
                "messages": [{"role": "system", "content": prompt}],
            }
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(ref token) = self.token {
            request = request.header("Authorization", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("LLM request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("LLM endpoint returned HTTP {}", status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("invalid LLM response: {}", e))?;

        let content = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| "LLM response missing content".to_string())?;

        parse_verdict(content)
    }
}

/// Clip the content to the span between the first '{' and the last '}'
/// before parsing; models pad strict-JSON answers with prose.
pub fn parse_verdict(content: &str) -> Result<ToolVerdict, String> {
    let start = content
        .find('{')
        .ok_or_else(|| "no JSON object in LLM content".to_string())?;
    let end = content
        .rfind('}')
        .ok_or_else(|| "no JSON object in LLM content".to_string())?;
    if end < start {
        return Err("malformed JSON span in LLM content".to_string());
    }

    serde_json::from_str(&content[start..=end])
        .map_err(|e| format!("failed to parse LLM verdict: {}", e))
}

/// The response forwarded with a component report contains only the
/// offending tool.
fn filtered_response(response: &Value, tool: &Value) -> Value {
    let mut filtered = response.clone();
    if let Some(result) = filtered.get_mut("result") {
        if let Some(obj) = result.as_object_mut() {
            obj.insert("tools".to_string(), json!([tool.clone()]));
        }
    }
    filtered
}

/// Fixed security-analyst instruction; the contract is strict JSON out.
pub fn build_audit_prompt(name: &str, description: &str, input_schema: Option<&Value>) -> String {
    let schema_summary = input_schema
        .map(flatten_schema)
        .unwrap_or_else(|| "(none)".to_string());

    format!(
        "You are a security analyst reviewing the metadata of a tool exposed \
         over the Model Context Protocol. Assess whether the tool is malicious \
         (data exfiltration, command execution, credential theft, prompt \
         injection staging) and whether its name honestly describes its \
         documented behavior.\n\n\
         Tool name: {}\n\
         Tool description: {}\n\
         Input schema: {}\n\n\
         Respond with strict JSON and nothing else, exactly this shape:\n\
         {{\"isMalicious\": <boolean>, \"maliciousMatchScore\": <number between 0 and 1>, \
         \"toolNameDescriptionMatchScore\": <number between 0 and 1>, \"reason\": \"<short explanation>\"}}",
        name, description, schema_summary
    )
}

/// Flatten an input schema into `name=<description>` segments joined by
/// " | ". Objects recurse as `parent.child`, arrays with item properties
/// as `parent[].child`; depth is capped.
pub fn flatten_schema(schema: &Value) -> String {
    let mut segments = Vec::new();
    if let Some(properties) = schema.get("properties") {
        walk_properties(properties, "", 0, &mut segments);
    }

    if segments.is_empty() {
        "(none)".to_string()
    } else {
        segments.join(" | ")
    }
}

fn walk_properties(properties: &Value, prefix: &str, depth: usize, segments: &mut Vec<String>) {
    if depth >= MAX_SCHEMA_DEPTH {
        return;
    }

    let map = match properties.as_object() {
        Some(map) => map,
        None => return,
    };

    for (name, prop) in map {
        let qualified = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };

        let description = prop
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("No description");
        segments.push(format!("{}={}", qualified, description));

        match prop.get("type").and_then(|t| t.as_str()) {
            Some("object") => {
                if let Some(children) = prop.get("properties") {
                    walk_properties(children, &qualified, depth + 1, segments);
                }
            }
            Some("array") => {
                if let Some(children) = prop.get("items").and_then(|i| i.get("properties")) {
                    let array_prefix = format!("{}[]", qualified);
                    walk_properties(children, &array_prefix, depth + 1, segments);
                }
            }
            _ => {}
        }
    }
}
