// Main entry point for the MCP Guardrail Gateway

use mcp_guardrail_gateway::api::{create_router, AppState};
use mcp_guardrail_gateway::config::Config;
use mcp_guardrail_gateway::engine::batch::BatchProcessor;
use mcp_guardrail_gateway::engine::rate_limit::RateLimitValidator;
use mcp_guardrail_gateway::engine::scanner::{HttpScannerTransport, ScannerClient};
use mcp_guardrail_gateway::engine::validator::PolicyValidator;
use mcp_guardrail_gateway::policy::store_client::PolicyStoreClient;
use mcp_guardrail_gateway::proxy::mirror::MirrorClient;
use mcp_guardrail_gateway::reporting::metadata::MetadataAuditor;
use mcp_guardrail_gateway::reporting::threat::ThreatReporter;
use mcp_guardrail_gateway::state::kv_store::{KvStore, RedisKvStore};

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load and validate configuration first (before any logging)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // 2. Initialize tracing subscriber with config values
    init_tracing(&config)?;

    info!("Starting MCP Guardrail Gateway");
    info!(
        bind_address = %config.bind_address,
        port = config.port,
        guardrails_enabled = config.guardrails_enabled,
        "Configuration loaded"
    );

    // 3. Policy store client (also serves the LLM endpoint base URL)
    let policy_store = Arc::new(PolicyStoreClient::new(
        config.policy_store_url.clone(),
        config.policy_store_token.clone(),
    ));
    info!(url = %config.policy_store_url, "Policy store client initialized");

    // 4. Threat reporter
    if config.threat_backend_token.is_none() {
        warn!("THREAT_BACKEND_TOKEN not set; threat reporting is disabled");
    }
    let reporter = Arc::new(ThreatReporter::new(
        config.threat_backend_url.clone(),
        config.threat_backend_token.clone(),
    ));

    // 5. Rate-limit store binding (optional)
    let rate_limiter = match config.redis_url.as_deref() {
        Some(redis_url) => {
            info!(redis_url = %redis_url, "Connecting to rate-limit store...");
            let store = RedisKvStore::new(redis_url, &config).await.map_err(|e| {
                error!(error = %e, "Failed to initialize rate-limit store");
                e
            })?;
            let store: Arc<dyn KvStore> = Arc::new(store);
            info!("Rate-limit store initialized");
            Some(RateLimitValidator::new(store))
        }
        None => {
            info!("REDIS_URL not set; rate limiting is disabled");
            None
        }
    };

    // 6. Scanner client
    let scanner = ScannerClient::new(Arc::new(HttpScannerTransport::new(
        config.scanner_url.clone(),
    )));
    info!(url = %config.scanner_url, "Scanner client initialized");

    // 7. Metadata auditor (shares the policy store base URL and token)
    let metadata_auditor = Arc::new(MetadataAuditor::new(
        config.policy_store_url.clone(),
        config.policy_store_token.clone(),
        Arc::clone(&reporter),
    ));

    // 8. Validation orchestrator
    let validator = Arc::new(PolicyValidator::new(
        rate_limiter,
        scanner,
        Arc::clone(&reporter),
        Some(metadata_auditor),
    ));
    info!("Policy validator initialized");

    // 9. Batch processor
    let batch_processor = Arc::new(BatchProcessor::new(
        Arc::clone(&policy_store),
        Arc::clone(&validator),
        Default::default(),
    ));

    // 10. Mirror client (optional)
    let mirror = match config.runtime_mirror_url.clone() {
        Some(url) => {
            let client = MirrorClient::new(url.clone(), 5).map_err(|e| {
                error!(error = %e, "Failed to create mirror client");
                e
            })?;
            info!(url = %url, "Mirror client initialized");
            Some(Arc::new(client))
        }
        None => None,
    };

    // 11. Assemble state and router
    let app_state = AppState {
        config: Arc::new(config.clone()),
        policy_store,
        validator,
        batch_processor,
        mirror,
    };
    let app = create_router(app_state);
    info!("Router created");

    // 12. Start HTTP server
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind to address");
        e
    })?;

    info!(addr = %addr, "Server listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber based on configuration
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            info!("SIGTERM received, starting graceful shutdown");
        },
    }
}
