// Axum web server layer

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod responses;

use crate::config::Config;
use crate::engine::batch::BatchProcessor;
use crate::engine::validator::PolicyValidator;
use crate::policy::store_client::PolicyStoreClient;
use crate::proxy::mirror::MirrorClient;

/// Application state containing all shared dependencies
///
/// Components are wrapped in Arc for shared ownership across async tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub policy_store: Arc<PolicyStoreClient>,
    pub validator: Arc<PolicyValidator>,
    pub batch_processor: Arc<BatchProcessor>,
    pub mirror: Option<Arc<MirrorClient>>,
}

/// Create the Axum router with all routes and middleware
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/api/ingestData",
            axum::routing::post(handlers::ingest_data_handler),
        )
        .route(
            "/api/validate/request",
            axum::routing::post(handlers::validate_request_handler),
        )
        .route(
            "/api/validate/response",
            axum::routing::post(handlers::validate_response_handler),
        )
        .route("/health", axum::routing::get(handlers::health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
