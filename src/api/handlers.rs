// Request handlers for API endpoints

use axum::{extract::State, http::HeaderMap, response::Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::responses::{
    ApiError, HealthResponse, IngestResponse, ValidateResponse,
};
use crate::api::AppState;
use crate::core::models::{IngestRecord, ValidationContext, ValidationResult};

/// Ingest endpoint body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPayload {
    #[serde(default)]
    pub batch_data: Vec<IngestRecord>,
}

/// Validate endpoint body
#[derive(Debug, Deserialize)]
pub struct ValidatePayload {
    pub payload: String,
}

/// Main handler for batch ingestion
///
/// POST /api/ingestData
///
/// When a mirror target is configured, the batch is tee'd to it in
/// parallel with local validation; mirror failures never fail the call.
pub async fn ingest_data_handler(
    State(app_state): State<AppState>,
    Json(body): Json<IngestPayload>,
) -> Result<Json<IngestResponse>, ApiError> {
    info!(items = body.batch_data.len(), "Received ingest batch");

    if let Some(mirror) = &app_state.mirror {
        let mirror = Arc::clone(mirror);
        let raw_batch = serde_json::json!({ "batchData": &body.batch_data });
        tokio::spawn(async move {
            if let Err(e) = mirror.forward(raw_batch).await {
                warn!(error = %e, "Mirror forward failed");
            }
        });
    }

    let results = app_state
        .batch_processor
        .process(&body.batch_data)
        .await
        .map_err(|e| {
            error!(error = %e, "Batch processing failed");
            ApiError::from_gateway_error(e)
        })?;

    Ok(Json(IngestResponse {
        success: true,
        result: "SUCCESS".to_string(),
        results,
    }))
}

/// POST /api/validate/request
pub async fn validate_request_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidatePayload>,
) -> Result<Json<ValidateResponse>, ApiError> {
    if !app_state.config.guardrails_enabled {
        return Ok(Json(allow_response()));
    }

    let ctx = build_context(&app_state, &headers, Some(body.payload), None).await?;

    let result = app_state.validator.validate_request(&ctx).await.map_err(|e| {
        error!(error = %e, "Request validation failed");
        ApiError::from_gateway_error(e)
    })?;

    Ok(Json(to_validate_response(result)))
}

/// POST /api/validate/response
pub async fn validate_response_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ValidatePayload>,
) -> Result<Json<ValidateResponse>, ApiError> {
    if !app_state.config.guardrails_enabled {
        return Ok(Json(allow_response()));
    }

    let ctx = build_context(&app_state, &headers, None, Some(body.payload)).await?;

    let result = app_state.validator.validate_response(&ctx).await.map_err(|e| {
        error!(error = %e, "Response validation failed");
        ApiError::from_gateway_error(e)
    })?;

    Ok(Json(to_validate_response(result)))
}

/// GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        status: "healthy".to_string(),
    })
}

/// Assemble a validation context for the single-payload endpoints
///
/// Policies and audit policies are fetched per call; a guardrail fetch
/// failure surfaces to the caller, an audit fetch failure degrades to no
/// audit rules.
async fn build_context(
    app_state: &AppState,
    headers: &HeaderMap,
    request_payload: Option<String>,
    response_payload: Option<String>,
) -> Result<ValidationContext, ApiError> {
    let policies = app_state
        .policy_store
        .fetch_guardrail_policies()
        .await
        .map_err(|e| {
            error!(error = %e, "Guardrail policy fetch failed");
            ApiError::from_gateway_error(e)
        })?;
    let audit_policies = app_state.policy_store.fetch_audit_policies().await;

    let endpoint = if request_payload.is_some() {
        "/api/validate/request"
    } else {
        "/api/validate/response"
    };

    Ok(ValidationContext {
        client_ip: header_string(headers, "x-forwarded-for")
            .map(|v| v.split(',').next().unwrap_or("").trim().to_string()),
        endpoint: Some(endpoint.to_string()),
        method: Some("POST".to_string()),
        request_headers: None,
        response_headers: None,
        status_code: None,
        request_payload,
        response_payload,
        mcp_server_name: header_string(headers, "x-mcp-server-name"),
        policies: (*policies).clone(),
        audit_policies: (*audit_policies).clone(),
        has_audit_rules: !audit_policies.is_empty(),
        rate_limit: Default::default(),
    })
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn allow_response() -> ValidateResponse {
    ValidateResponse {
        allowed: true,
        modified: false,
        modified_payload: None,
        reason: None,
    }
}

fn to_validate_response(result: ValidationResult) -> ValidateResponse {
    ValidateResponse {
        allowed: result.allowed,
        modified: result.modified,
        modified_payload: result.modified_payload,
        reason: result.reason,
    }
}
