// Response types for API endpoints

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::core::models::BatchItemResult;

/// Success envelope for the ingest endpoint
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    pub result: String,
    pub results: Vec<BatchItemResult>,
}

/// Response for the single-payload validate endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub allowed: bool,
    pub modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: String,
}

/// Error envelope shared by all endpoints
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub result: String,
    pub errors: Vec<String>,
}

/// API error type that converts domain errors to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: String) -> Self {
        Self { status, message }
    }

    /// Create from GatewayError
    pub fn from_gateway_error(err: crate::core::errors::GatewayError) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self {
            status,
            message: err.user_message(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            result: "ERROR".to_string(),
            errors: vec![self.message],
        });
        (self.status, body).into_response()
    }
}

impl From<crate::core::errors::GatewayError> for ApiError {
    fn from(err: crate::core::errors::GatewayError) -> Self {
        ApiError::from_gateway_error(err)
    }
}
