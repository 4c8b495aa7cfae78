// Domain error types - Secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Guardrail policy fetch failed (HTTP 502) - fatal for the request
    #[error("Policy fetch failed: {0}")]
    PolicyFetch(String),

    /// Invalid request body (HTTP 400)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error (HTTP 500)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// State management error (HTTP 500)
    #[error("State error: {0}")]
    State(String),

    /// Transient failure, typically a tripped circuit breaker (HTTP 503)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Downstream dependency failure (HTTP 502)
    #[error("Dependency '{service}' failed: {error}")]
    DependencyFailure { service: String, error: String },
}

impl GatewayError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::PolicyFetch(_) => 502,
            GatewayError::InvalidRequest(_) => 400,
            GatewayError::Configuration(_) => 500,
            GatewayError::State(_) => 500,
            GatewayError::Transient(_) => 503,
            GatewayError::DependencyFailure { .. } => 502,
        }
    }

    /// Get user-friendly error message (no sensitive information)
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::PolicyFetch(_) => "Policy store unavailable".to_string(),
            GatewayError::InvalidRequest(reason) => format!("Invalid request: {}", reason),
            GatewayError::Configuration(_) => "Internal error".to_string(),
            GatewayError::State(_) => "Internal error".to_string(),
            GatewayError::Transient(_) => "Service unavailable".to_string(),
            GatewayError::DependencyFailure { .. } => "Service unavailable".to_string(),
        }
    }
}
