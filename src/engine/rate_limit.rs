// Sliding-window rate limiting over the shared key-value store

use crate::core::models::{
    IdentifierType, RateLimitCell, ValidationContext, ValidationResult,
};
use crate::mcp::extractor;
use crate::state::kv_store::KvStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const RATE_LIMIT_POLICY_ID: &str = "RateLimitPolicy";

/// Per-identifier request counter backed by the shared KV store
///
/// The read-modify-write is not strongly atomic; concurrent edges may
/// over-count slightly under last-write-wins KV semantics. Cells never
/// decrement; they expire with the window.
pub struct RateLimitValidator {
    kv: Arc<dyn KvStore>,
}

impl RateLimitValidator {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Validate a request payload against the context's rate-limit config
    ///
    /// Applies only to enabled configs and `tools/call` payloads; anything
    /// else returns `None` (validator did not apply). Store failures allow
    /// the request.
    pub async fn validate(
        &self,
        ctx: &ValidationContext,
        payload: &str,
    ) -> Option<ValidationResult> {
        let config = &ctx.rate_limit;
        if !config.enabled {
            return None;
        }

        let tool_name = extractor::extract_tool_name(payload)?;

        let identifier = build_identifier(ctx, &tool_name, &config.identifier_types);
        let key = format!("ratelimit:{}", identifier);
        let now_ms = unix_millis();

        let cell = match self.kv.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<RateLimitCell>(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, key = %key, "Rate-limit store read failed, allowing request");
                return Some(ValidationResult::allow());
            }
        };

        match cell {
            Some(cell) if now_ms <= cell.reset_at => {
                if cell.count >= config.limit {
                    let reset_in_seconds = ((cell.reset_at - now_ms) as f64 / 1000.0).ceil() as i64;
                    let metadata: HashMap<String, Value> = HashMap::from([
                        (
                            "policy_id".to_string(),
                            Value::String(RATE_LIMIT_POLICY_ID.to_string()),
                        ),
                        ("tool".to_string(), Value::String(tool_name.clone())),
                        ("current_count".to_string(), json!(cell.count)),
                        ("limit".to_string(), json!(config.limit)),
                        ("reset_at".to_string(), json!(cell.reset_at)),
                        ("reset_in_seconds".to_string(), json!(reset_in_seconds)),
                    ]);
                    return Some(ValidationResult::blocked(
                        format!(
                            "Rate limit exceeded for tool '{}'. Try again in {} seconds",
                            tool_name, reset_in_seconds
                        ),
                        metadata,
                    ));
                }

                // Window still open: bump the counter, keep the reset point
                let updated = RateLimitCell {
                    count: cell.count + 1,
                    reset_at: cell.reset_at,
                };
                let remaining_secs =
                    (((cell.reset_at - now_ms) as f64) / 1000.0).ceil().max(1.0) as u64;
                self.write_cell(&key, &updated, remaining_secs).await;
                debug!(key = %key, count = updated.count, "Rate-limit counter incremented");
                Some(ValidationResult::allow())
            }
            _ => {
                // No cell or the window has elapsed: start a fresh window
                let fresh = RateLimitCell {
                    count: 1,
                    reset_at: now_ms + (config.window_seconds as i64) * 1000,
                };
                self.write_cell(&key, &fresh, config.window_seconds).await;
                Some(ValidationResult::allow())
            }
        }
    }

    async fn write_cell(&self, key: &str, cell: &RateLimitCell, ttl_seconds: u64) {
        let raw = match serde_json::to_string(cell) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Failed to serialize rate-limit cell");
                return;
            }
        };
        if let Err(e) = self.kv.set_with_ttl(key, &raw, ttl_seconds).await {
            warn!(error = %e, key = %key, "Rate-limit store write failed");
        }
    }
}

/// Join identifier components in declaration order with ':'
fn build_identifier(
    ctx: &ValidationContext,
    tool_name: &str,
    identifier_types: &[IdentifierType],
) -> String {
    identifier_types
        .iter()
        .map(|id_type| match id_type {
            IdentifierType::Ip => ctx.client_ip.clone().unwrap_or_else(|| "unknown".to_string()),
            IdentifierType::User => header_value(ctx.request_headers.as_ref(), "x-user-id")
                .or_else(|| ctx.client_ip.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            IdentifierType::Tool => tool_name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(":")
}

fn header_value(headers: Option<&Value>, name: &str) -> Option<String> {
    headers?
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::RateLimitConfig;
    use crate::state::kv_store::MemoryKvStore;

    fn tool_call_payload(tool: &str) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{{"name":"{}"}}}}"#,
            tool
        )
    }

    fn context_with_limit(limit: u64, window_seconds: u64) -> ValidationContext {
        ValidationContext {
            client_ip: Some("10.0.0.1".to_string()),
            rate_limit: RateLimitConfig {
                enabled: true,
                limit,
                window_seconds,
                identifier_types: vec![IdentifierType::Tool],
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_skips_non_tool_calls() {
        let validator = RateLimitValidator::new(Arc::new(MemoryKvStore::new()));
        let ctx = context_with_limit(1, 60);
        let payload = r#"{"method":"prompts/get","params":{"name":"x"}}"#;
        assert!(validator.validate(&ctx, payload).await.is_none());
    }

    #[tokio::test]
    async fn test_skips_when_disabled() {
        let validator = RateLimitValidator::new(Arc::new(MemoryKvStore::new()));
        let mut ctx = context_with_limit(1, 60);
        ctx.rate_limit.enabled = false;
        assert!(validator
            .validate(&ctx, &tool_call_payload("read_file"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_blocks_after_limit() {
        let validator = RateLimitValidator::new(Arc::new(MemoryKvStore::new()));
        let ctx = context_with_limit(2, 60);
        let payload = tool_call_payload("read_file");

        let first = validator.validate(&ctx, &payload).await.unwrap();
        assert!(first.allowed);
        let second = validator.validate(&ctx, &payload).await.unwrap();
        assert!(second.allowed);

        let third = validator.validate(&ctx, &payload).await.unwrap();
        assert!(!third.allowed);
        let reason = third.reason.unwrap();
        assert!(reason.contains("read_file"));
        assert_eq!(
            third.metadata.get("policy_id"),
            Some(&Value::String(RATE_LIMIT_POLICY_ID.to_string()))
        );
        let reset_in = third.metadata.get("reset_in_seconds").unwrap().as_i64().unwrap();
        assert!((1..=60).contains(&reset_in));
    }

    #[tokio::test]
    async fn test_separate_tools_have_separate_windows() {
        let validator = RateLimitValidator::new(Arc::new(MemoryKvStore::new()));
        let ctx = context_with_limit(1, 60);

        let first = validator
            .validate(&ctx, &tool_call_payload("read_file"))
            .await
            .unwrap();
        assert!(first.allowed);

        let other = validator
            .validate(&ctx, &tool_call_payload("write_file"))
            .await
            .unwrap();
        assert!(other.allowed);

        let blocked = validator
            .validate(&ctx, &tool_call_payload("read_file"))
            .await
            .unwrap();
        assert!(!blocked.allowed);
    }

    #[tokio::test]
    async fn test_identifier_join_order() {
        let ctx = ValidationContext {
            client_ip: Some("10.0.0.1".to_string()),
            request_headers: Some(serde_json::json!({"x-user-id": "alice"})),
            ..Default::default()
        };
        let identifier = build_identifier(
            &ctx,
            "read_file",
            &[IdentifierType::Ip, IdentifierType::User, IdentifierType::Tool],
        );
        assert_eq!(identifier, "10.0.0.1:alice:read_file");
    }

    #[tokio::test]
    async fn test_user_identifier_falls_back_to_ip() {
        let ctx = ValidationContext {
            client_ip: Some("10.0.0.1".to_string()),
            ..Default::default()
        };
        let identifier = build_identifier(&ctx, "t", &[IdentifierType::User]);
        assert_eq!(identifier, "10.0.0.1");

        let anonymous = ValidationContext::default();
        assert_eq!(build_identifier(&anonymous, "t", &[IdentifierType::User]), "unknown");
    }
}
