// Batch processor - sequential validation of ingested traffic records

use crate::core::errors::GatewayError;
use crate::core::models::{
    AuditPolicy, BatchItemResult, IngestRecord, Policy, RateLimitConfig, ValidationContext,
};
use crate::engine::validator::PolicyValidator;
use crate::policy::store_client::PolicyStoreClient;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Validates each record's request and response halves against policies
/// fetched once per batch. Items run sequentially so result ordering
/// matches input ordering; a failing half never aborts the batch.
pub struct BatchProcessor {
    store: Arc<PolicyStoreClient>,
    validator: Arc<PolicyValidator>,
    rate_limit: RateLimitConfig,
}

impl BatchProcessor {
    pub fn new(
        store: Arc<PolicyStoreClient>,
        validator: Arc<PolicyValidator>,
        rate_limit: RateLimitConfig,
    ) -> Self {
        Self {
            store,
            validator,
            rate_limit,
        }
    }

    pub async fn process(
        &self,
        records: &[IngestRecord],
    ) -> Result<Vec<BatchItemResult>, GatewayError> {
        let policies = self.store.fetch_guardrail_policies().await?;
        let audit_policies = self.store.fetch_audit_policies().await;

        info!(
            items = records.len(),
            policies = policies.len(),
            audit_policies = audit_policies.len(),
            "Processing ingest batch"
        );

        let mut results = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            results.push(
                self.process_record(index, record, &policies, &audit_policies)
                    .await,
            );
        }
        Ok(results)
    }

    async fn process_record(
        &self,
        index: usize,
        record: &IngestRecord,
        policies: &Arc<Vec<Policy>>,
        audit_policies: &Arc<HashMap<String, AuditPolicy>>,
    ) -> BatchItemResult {
        let ctx = self.context_from_record(record, policies, audit_policies);

        let mut result = BatchItemResult {
            index,
            method: record.method.clone(),
            path: record.path.clone(),
            request_allowed: true,
            request_modified: false,
            request_modified_payload: None,
            request_error: None,
            response_allowed: true,
            response_modified: false,
            response_modified_payload: None,
            response_error: None,
        };

        if has_content(record.request_payload.as_deref()) {
            match self.validator.validate_request(&ctx).await {
                Ok(validation) => {
                    result.request_allowed = validation.allowed;
                    result.request_modified = validation.modified;
                    result.request_modified_payload = validation.modified_payload;
                }
                Err(e) => {
                    warn!(index, error = %e, "Request-half validation failed");
                    result.request_error = Some(e.to_string());
                }
            }
        }

        if has_content(record.response_payload.as_deref()) {
            match self.validator.validate_response(&ctx).await {
                Ok(validation) => {
                    result.response_allowed = validation.allowed;
                    result.response_modified = validation.modified;
                    result.response_modified_payload = validation.modified_payload;
                }
                Err(e) => {
                    warn!(index, error = %e, "Response-half validation failed");
                    result.response_error = Some(e.to_string());
                }
            }
        }

        result
    }

    fn context_from_record(
        &self,
        record: &IngestRecord,
        policies: &Arc<Vec<Policy>>,
        audit_policies: &Arc<HashMap<String, AuditPolicy>>,
    ) -> ValidationContext {
        ValidationContext {
            client_ip: record.ip.clone(),
            endpoint: record.path.clone(),
            method: record.method.clone(),
            request_headers: parse_header_json(record.request_headers.as_deref()),
            response_headers: parse_header_json(record.response_headers.as_deref()),
            status_code: record
                .status_code
                .as_deref()
                .and_then(|s| s.parse().ok()),
            request_payload: record.request_payload.clone(),
            response_payload: record.response_payload.clone(),
            mcp_server_name: record
                .extra
                .get("mcpServerName")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            policies: (**policies).clone(),
            audit_policies: (**audit_policies).clone(),
            has_audit_rules: !audit_policies.is_empty(),
            rate_limit: self.rate_limit.clone(),
        }
    }
}

fn has_content(payload: Option<&str>) -> bool {
    payload.map(|p| !p.is_empty()).unwrap_or(false)
}

/// Header blobs arrive as JSON strings; unparseable ones are dropped
fn parse_header_json(raw: Option<&str>) -> Option<Value> {
    raw.and_then(|r| serde_json::from_str(r).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_json() {
        assert_eq!(
            parse_header_json(Some(r#"{"x-user-id":"alice"}"#)),
            Some(serde_json::json!({"x-user-id": "alice"}))
        );
        assert_eq!(parse_header_json(Some("not json")), None);
        assert_eq!(parse_header_json(None), None);
    }

    #[test]
    fn test_has_content() {
        assert!(has_content(Some("{}")));
        assert!(!has_content(Some("")));
        assert!(!has_content(None));
    }
}
