// Remote scanner client - parallel fan-out with a global deadline

use crate::core::errors::GatewayError;
use crate::core::models::FilterType;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest text the scanner service accepts
pub const MAX_SCAN_BYTES: usize = 1024 * 1024;

/// Global deadline shared by all in-flight scanner calls
pub const SCAN_DEADLINE: Duration = Duration::from_secs(5);

/// Remote scanner names for a filter type
///
/// Only scanner filter types map to anything; locally-evaluated types
/// return an empty slice.
pub fn scanners_for_filter_type(filter_type: FilterType) -> &'static [&'static str] {
    match filter_type {
        FilterType::HarmfulCategories => &["Toxicity"],
        FilterType::PromptAttacks => &["PromptInjection"],
        FilterType::BanSubstrings => &["BanSubstrings"],
        FilterType::BanTopics => &["BanTopics"],
        _ => &[],
    }
}

/// One outbound scan call
#[derive(Debug, Clone, Serialize)]
pub struct ScanRequest {
    pub text: String,
    pub scanner_type: String,
    pub scanner_name: String,
    pub config: HashMap<String, Value>,
}

/// Verdict returned by a single scanner
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerVerdict {
    pub scanner_name: String,
    pub is_valid: bool,
    #[serde(default)]
    pub risk_score: f64,
    #[serde(default)]
    pub details: Option<Value>,
}

/// A scan tagged with the policy that requested it
#[derive(Debug, Clone)]
pub struct TaggedScan {
    pub scanner_name: String,
    pub policy_id: String,
    pub policy_name: String,
    pub config: HashMap<String, Value>,
}

/// Aggregate scan outcome; failures are counted, never surfaced
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub results: Vec<(TaggedScan, ScannerVerdict)>,
    pub failure_count: usize,
}

/// Host-provided transport binding to the scanner service
#[async_trait]
pub trait ScannerTransport: Send + Sync {
    async fn scan(&self, request: &ScanRequest) -> Result<ScannerVerdict, String>;
}

/// Production transport: one POST per scanner to the scan endpoint
pub struct HttpScannerTransport {
    client: Client,
    url: String,
}

impl HttpScannerTransport {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(SCAN_DEADLINE)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url }
    }
}

#[async_trait]
impl ScannerTransport for HttpScannerTransport {
    async fn scan(&self, request: &ScanRequest) -> Result<ScannerVerdict, String> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("scan request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("scanner returned HTTP {}", status));
        }

        response
            .json()
            .await
            .map_err(|e| format!("invalid scanner response: {}", e))
    }
}

/// Fans scan calls out concurrently under one deadline
pub struct ScannerClient {
    transport: Arc<dyn ScannerTransport>,
}

impl ScannerClient {
    pub fn new(transport: Arc<dyn ScannerTransport>) -> Self {
        Self { transport }
    }

    /// Run every tagged scan against the text
    ///
    /// All calls share a single 5-second deadline; calls still in flight
    /// at the deadline count as failures, as do transport errors. The
    /// caller decides what a `is_valid=false` verdict means.
    pub async fn scan(
        &self,
        text: &str,
        scans: Vec<TaggedScan>,
    ) -> Result<ScanOutcome, GatewayError> {
        if text.len() > MAX_SCAN_BYTES {
            return Err(GatewayError::InvalidRequest(format!(
                "scan input exceeds {} bytes",
                MAX_SCAN_BYTES
            )));
        }

        if scans.is_empty() {
            return Ok(ScanOutcome::default());
        }

        let deadline = tokio::time::Instant::now() + SCAN_DEADLINE;

        let calls = scans.into_iter().map(|tag| {
            let transport = Arc::clone(&self.transport);
            let request = ScanRequest {
                text: text.to_string(),
                // The scanner service only supports prompt-type scans
                scanner_type: "prompt".to_string(),
                scanner_name: tag.scanner_name.clone(),
                config: tag.config.clone(),
            };
            async move {
                let result =
                    tokio::time::timeout_at(deadline, transport.scan(&request)).await;
                (tag, result)
            }
        });

        let mut outcome = ScanOutcome::default();
        for (tag, result) in futures::future::join_all(calls).await {
            match result {
                Ok(Ok(verdict)) => {
                    debug!(
                        scanner = %verdict.scanner_name,
                        is_valid = verdict.is_valid,
                        "Scanner verdict received"
                    );
                    outcome.results.push((tag, verdict));
                }
                Ok(Err(e)) => {
                    warn!(scanner = %tag.scanner_name, error = %e, "Scanner call failed");
                    outcome.failure_count += 1;
                }
                Err(_) => {
                    warn!(scanner = %tag.scanner_name, "Scanner call hit the global deadline");
                    outcome.failure_count += 1;
                }
            }
        }

        Ok(outcome)
    }
}
