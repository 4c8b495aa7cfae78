// Policy validation orchestrator - composes the validator bank into one
// ternary decision per payload

use crate::core::errors::GatewayError;
use crate::core::models::{blocked_response, FilterType, ValidationContext, ValidationResult};
use crate::engine::audit::AuditValidator;
use crate::engine::patterns;
use crate::engine::rate_limit::RateLimitValidator;
use crate::engine::scanner::{self, ScannerClient, TaggedScan};
use crate::mcp::extractor;
use crate::policy::store_client::GUARDRAIL_POLICY_ID;
use crate::reporting::metadata::MetadataAuditor;
use crate::reporting::threat::ThreatReporter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Request,
    Response,
}

/// Drives one payload through the full validation pipeline:
/// rate limit, audit, extraction, deterministic matchers, scanner fan-out.
///
/// Validators fail open individually; a block from an earlier stage is
/// never overridden by a later one. Every block or redaction detaches
/// exactly one threat report.
pub struct PolicyValidator {
    rate_limiter: Option<RateLimitValidator>,
    scanner: ScannerClient,
    reporter: Arc<ThreatReporter>,
    metadata_auditor: Option<Arc<MetadataAuditor>>,
}

impl PolicyValidator {
    pub fn new(
        rate_limiter: Option<RateLimitValidator>,
        scanner: ScannerClient,
        reporter: Arc<ThreatReporter>,
        metadata_auditor: Option<Arc<MetadataAuditor>>,
    ) -> Self {
        Self {
            rate_limiter,
            scanner,
            reporter,
            metadata_auditor,
        }
    }

    /// Validate the request half of the context
    pub async fn validate_request(
        &self,
        ctx: &ValidationContext,
    ) -> Result<ValidationResult, GatewayError> {
        let payload = match ctx.request_payload.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(ValidationResult::allow()),
        };

        if let Some(rate_limiter) = &self.rate_limiter {
            if let Some(result) = rate_limiter.validate(ctx, payload).await {
                if !result.allowed {
                    return Ok(self.finalize_block(result, ctx, payload));
                }
            }
        }

        if ctx.has_audit_rules {
            if let Some(result) = AuditValidator::validate(ctx, payload) {
                if !result.allowed {
                    return Ok(self.finalize_block(result, ctx, payload));
                }
            }
        }

        let scannable = match extractor::extract_scannable_text(payload) {
            Some(text) => text,
            // Safe protocol method: no scanning of any kind
            None => return Ok(ValidationResult::allow()),
        };

        self.evaluate_rules(ctx, payload, &scannable, Direction::Request)
            .await
    }

    /// Validate the response half of the context
    ///
    /// Responses skip audit and rate limiting. A response to a tools/list
    /// request additionally kicks off the detached metadata audit.
    pub async fn validate_response(
        &self,
        ctx: &ValidationContext,
    ) -> Result<ValidationResult, GatewayError> {
        if let Some(auditor) = &self.metadata_auditor {
            let is_tools_list = ctx
                .request_payload
                .as_deref()
                .and_then(extractor::parse_method)
                .as_deref()
                == Some("tools/list");
            if is_tools_list && ctx.response_payload.is_some() {
                auditor.audit_detached(ctx.clone());
            }
        }

        let payload = match ctx.response_payload.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(ValidationResult::allow()),
        };

        let scannable = match extractor::extract_scannable_text(payload) {
            Some(text) => text,
            None => return Ok(ValidationResult::allow()),
        };

        self.evaluate_rules(ctx, payload, &scannable, Direction::Response)
            .await
    }

    async fn evaluate_rules(
        &self,
        ctx: &ValidationContext,
        payload: &str,
        scannable: &str,
        direction: Direction,
    ) -> Result<ValidationResult, GatewayError> {
        let mut working = payload.to_string();
        let mut modified = false;
        let mut redacting_policy = GUARDRAIL_POLICY_ID.to_string();
        let mut scan_tasks: Vec<TaggedScan> = Vec::new();

        for policy in ctx.policies.iter().filter(|p| p.active) {
            let rules = match direction {
                Direction::Request => &policy.request_rules,
                Direction::Response => &policy.response_rules,
            };

            for rule in rules {
                match rule.filter_type {
                    FilterType::Pii => {
                        if let Some(result) =
                            patterns::validate_pii_rule(rule, &policy.id, &working)
                        {
                            if !result.allowed {
                                return Ok(self.finalize_block(result, ctx, payload));
                            }
                            if let Some(redacted) = result.modified_payload {
                                working = redacted;
                                modified = true;
                                redacting_policy = policy.id.clone();
                            }
                        }
                    }
                    FilterType::Regex => {
                        if let Some(result) =
                            patterns::validate_regex_rule(rule, &policy.id, &working)
                        {
                            if !result.allowed {
                                return Ok(self.finalize_block(result, ctx, payload));
                            }
                            if let Some(redacted) = result.modified_payload {
                                working = redacted;
                                modified = true;
                                redacting_policy = policy.id.clone();
                            }
                        }
                    }
                    other => {
                        for scanner_name in scanner::scanners_for_filter_type(other) {
                            scan_tasks.push(TaggedScan {
                                scanner_name: scanner_name.to_string(),
                                policy_id: policy.id.clone(),
                                policy_name: policy.name.clone(),
                                config: rule.config.clone(),
                            });
                        }
                    }
                }
            }
        }

        if !scan_tasks.is_empty() {
            let outcome = self.scanner.scan(scannable, scan_tasks).await?;
            if outcome.failure_count > 0 {
                warn!(
                    failures = outcome.failure_count,
                    "Some scanner calls failed; their verdicts are skipped"
                );
            }

            for (tag, verdict) in &outcome.results {
                if verdict.is_valid {
                    continue;
                }

                let mut metadata: HashMap<String, Value> = HashMap::from([
                    (
                        "policy_id".to_string(),
                        Value::String(tag.policy_id.clone()),
                    ),
                    (
                        "scanner".to_string(),
                        Value::String(verdict.scanner_name.clone()),
                    ),
                    ("risk_score".to_string(), json!(verdict.risk_score)),
                ]);
                if let Some(details) = &verdict.details {
                    metadata.insert("details".to_string(), details.clone());
                }

                let result = ValidationResult::blocked(
                    format!(
                        "Content flagged by scanner {}: risk score {}",
                        verdict.scanner_name, verdict.risk_score
                    ),
                    metadata,
                );
                return Ok(self.finalize_block(result, ctx, payload));
            }
        }

        if modified {
            debug!(policy_id = %redacting_policy, "Payload redacted");
            self.report_threat(&redacting_policy, ctx, None);
            return Ok(ValidationResult::redacted(working));
        }

        Ok(ValidationResult::allow())
    }

    /// Attach the blocked-response envelope and detach the threat report
    fn finalize_block(
        &self,
        mut result: ValidationResult,
        ctx: &ValidationContext,
        payload: &str,
    ) -> ValidationResult {
        let reason = result.reason.clone().unwrap_or_default();
        let envelope = blocked_response(&reason, payload);

        let filter_id = result
            .metadata
            .get("policy_id")
            .and_then(|v| v.as_str())
            .unwrap_or(GUARDRAIL_POLICY_ID)
            .to_string();
        self.report_threat(&filter_id, ctx, Some(envelope.to_string()));

        result.blocked_response = Some(envelope);
        result
    }

    fn report_threat(
        &self,
        filter_id: &str,
        ctx: &ValidationContext,
        response_payload: Option<String>,
    ) {
        let event = self
            .reporter
            .build_event(filter_id, ctx, None, response_payload);
        self.reporter.report_detached(event);
    }
}
