// Mirror client - tees ingested batches to the legacy runtime service

use crate::core::errors::GatewayError;
use crate::core::resilience::{create_circuit_breaker, execute_with_cb, EgressCircuitBreaker};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Forwards a copy of ingested traffic to the analytics runtime
///
/// Mirroring is best effort: failures trip the circuit breaker and are
/// reported to the caller for logging, never for request failure.
pub struct MirrorClient {
    http_client: Client,
    url: String,
    cb: EgressCircuitBreaker,
}

impl MirrorClient {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self, GatewayError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(2)) // Fail fast on connection
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(90)) // Reuse connections
            .build()
            .map_err(|e| {
                GatewayError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            url,
            cb: create_circuit_breaker(),
        })
    }

    /// POST the raw batch body to the mirror target
    pub async fn forward(&self, body: Value) -> Result<(), GatewayError> {
        // Clone into the closure: the circuit breaker future must own its
        // inputs
        let url = self.url.clone();
        let client = self.http_client.clone();
        let request_id = Uuid::new_v4().to_string();

        execute_with_cb(&self.cb, "runtime-mirror", || async move {
            let response = client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-Request-Id", &request_id)
                .json(&body)
                .send()
                .await
                .map_err(|e| format!("mirror request failed: {}", e))?;

            let status = response.status();
            if !status.is_success() {
                return Err(format!("mirror target returned HTTP {}", status));
            }

            debug!(request_id = %request_id, "Batch mirrored");
            Ok(())
        })
        .await
    }
}
