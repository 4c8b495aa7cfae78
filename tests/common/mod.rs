// Common test utilities and helpers for all test modules

use mcp_guardrail_gateway::api::{create_router, AppState};
use mcp_guardrail_gateway::config::Config;
use mcp_guardrail_gateway::engine::batch::BatchProcessor;
use mcp_guardrail_gateway::engine::rate_limit::RateLimitValidator;
use mcp_guardrail_gateway::engine::scanner::{HttpScannerTransport, ScannerClient};
use mcp_guardrail_gateway::engine::validator::PolicyValidator;
use mcp_guardrail_gateway::policy::store_client::PolicyStoreClient;
use mcp_guardrail_gateway::reporting::metadata::MetadataAuditor;
use mcp_guardrail_gateway::reporting::threat::ThreatReporter;
use mcp_guardrail_gateway::state::kv_store::KvStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Assemble a fully-wired application state against test endpoints
pub fn build_state(
    policy_store_url: &str,
    scanner_url: &str,
    threat_url: &str,
    threat_token: Option<&str>,
    guardrails_enabled: bool,
    kv: Option<Arc<dyn KvStore>>,
) -> AppState {
    let mut config = Config::test_config();
    config.policy_store_url = policy_store_url.to_string();
    config.scanner_url = scanner_url.to_string();
    config.threat_backend_url = threat_url.to_string();
    config.threat_backend_token = threat_token.map(|t| t.to_string());
    config.guardrails_enabled = guardrails_enabled;

    let policy_store = Arc::new(PolicyStoreClient::new(
        config.policy_store_url.clone(),
        config.policy_store_token.clone(),
    ));
    let reporter = Arc::new(ThreatReporter::new(
        config.threat_backend_url.clone(),
        config.threat_backend_token.clone(),
    ));
    let scanner = ScannerClient::new(Arc::new(HttpScannerTransport::new(
        config.scanner_url.clone(),
    )));
    let metadata_auditor = Arc::new(MetadataAuditor::new(
        config.policy_store_url.clone(),
        config.policy_store_token.clone(),
        Arc::clone(&reporter),
    ));
    let validator = Arc::new(PolicyValidator::new(
        kv.map(RateLimitValidator::new),
        scanner,
        Arc::clone(&reporter),
        Some(metadata_auditor),
    ));
    let batch_processor = Arc::new(BatchProcessor::new(
        Arc::clone(&policy_store),
        Arc::clone(&validator),
        Default::default(),
    ));

    AppState {
        config: Arc::new(config),
        policy_store,
        validator,
        batch_processor,
        mirror: None,
    }
}

/// Serve the router on an ephemeral port; returns its base URL
pub async fn spawn_gateway(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().unwrap();
    let app = create_router(state);

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .await
            .expect("test server failed");
    });

    format!("http://{}", addr)
}

/// A guardrail policy body with an email-mask PII rule, both directions
pub fn email_mask_policy_body() -> Value {
    json!({
        "guardrailPolicies": [{
            "name": "default",
            "active": true,
            "applyOnRequest": true,
            "applyOnResponse": true,
            "piiTypes": [{"type": "email", "behavior": "mask"}]
        }]
    })
}

/// A guardrail policy body with prompt-attack scanning enabled
pub fn prompt_attack_policy_body() -> Value {
    json!({
        "guardrailPolicies": [{
            "name": "default",
            "active": true,
            "applyOnRequest": true,
            "applyOnResponse": false,
            "promptAttacks": true
        }]
    })
}

/// Poll a wiremock server until it has seen `count` requests
pub async fn wait_for_requests(server: &wiremock::MockServer, count: usize) -> Vec<wiremock::Request> {
    for _ in 0..40 {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count {
            return received;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "expected {} requests, saw {:?}",
        count,
        server.received_requests().await
    );
}
