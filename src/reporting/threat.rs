// Threat reporter - canonical malicious-event records, fired detached

use crate::core::models::{MaliciousEvent, ValidationContext};
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Builds and POSTs malicious-event records to the threat backend
///
/// Reporting always runs detached from the request path and never
/// propagates failures back into validation.
pub struct ThreatReporter {
    client: Client,
    url: String,
    token: Option<String>,
}

impl ThreatReporter {
    pub fn new(url: String, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, url, token }
    }

    /// Construct the canonical event for a blocked or redacted payload
    ///
    /// `response_payload` carries the blocked-response envelope (or the
    /// filtered tools/list response for component reports). The collection
    /// id intentionally reuses the detection timestamp; the threat backend
    /// keys recurrences off it.
    pub fn build_event(
        &self,
        filter_id: &str,
        ctx: &ValidationContext,
        endpoint_override: Option<String>,
        response_payload: Option<String>,
    ) -> MaliciousEvent {
        let detected_at = unix_seconds();
        let ip = ctx
            .client_ip
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let endpoint = endpoint_override
            .or_else(|| ctx.endpoint.clone())
            .unwrap_or_else(|| "/mcp/unknown".to_string());
        let method = ctx.method.clone().unwrap_or_else(|| "POST".to_string());
        let status_code = ctx.status_code.unwrap_or(200);

        let request_headers = ctx
            .request_headers
            .as_ref()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let response_headers = ctx
            .response_headers
            .as_ref()
            .map(|h| h.to_string())
            .unwrap_or_else(|| "{}".to_string());

        let api_payload = json!({
            "method": method,
            "requestPayload": ctx.request_payload.clone().unwrap_or_default(),
            "responsePayload": response_payload
                .or_else(|| ctx.response_payload.clone())
                .unwrap_or_default(),
            "ip": ip,
            "destIp": ip,
            "source": "OTHER",
            "type": "http",
            "akto_vxlan_id": "",
            "path": endpoint,
            "requestHeaders": request_headers,
            "responseHeaders": response_headers,
            "time": 0,
            "akto_account_id": "",
            "statusCode": status_code,
            "status": "OK",
        });

        MaliciousEvent {
            actor: ip.clone(),
            filter_id: filter_id.to_string(),
            detected_at: detected_at.to_string(),
            latest_api_ip: ip,
            latest_api_endpoint: endpoint,
            latest_api_method: method,
            latest_api_collection_id: detected_at,
            latest_api_payload: api_payload.to_string(),
            event_type: "EVENT_TYPE_SINGLE".to_string(),
            category: filter_id.to_string(),
            sub_category: filter_id.to_string(),
            severity: "CRITICAL".to_string(),
            detection_type: "Rule-Based".to_string(),
            metadata: HashMap::from([("countryCode".to_string(), "IN".to_string())]),
        }
    }

    /// POST the event; non-2xx and transport failures are logged only.
    /// A missing token skips the call entirely.
    pub async fn report(&self, event: MaliciousEvent) {
        let token = match self.token.as_ref() {
            Some(token) => token,
            None => {
                debug!("No threat backend token configured, skipping report");
                return;
            }
        };

        let result = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", token))
            .json(&event)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(filter_id = %event.filter_id, "Threat event reported");
            }
            Ok(response) => {
                warn!(
                    status = %response.status(),
                    filter_id = %event.filter_id,
                    "Threat backend rejected event"
                );
            }
            Err(e) => {
                warn!(error = %e, filter_id = %event.filter_id, "Threat report failed");
            }
        }
    }

    /// Fire-and-forget: the report survives request termination
    pub fn report_detached(self: &Arc<Self>, event: MaliciousEvent) {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            reporter.report(event).await;
        });
    }
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
