// Configuration management

use crate::core::errors::GatewayError;
use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_POLICY_STORE_URL: &str = "https://cyborg.akto.io";
pub const DEFAULT_THREAT_BACKEND_URL: &str =
    "https://tbs.akto.io/api/threat_detection/record_malicious_event";
pub const DEFAULT_SCANNER_URL: &str = "https://model-executor/scan";

/// Application configuration loaded from environment variables
///
/// All configuration is validated on load with clear error messages.
/// Optional bindings (Redis, mirror target, tokens) degrade features
/// rather than failing startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub bind_address: String,
    pub port: u16,

    // Policy store / LLM endpoint (same service, same raw token)
    pub policy_store_url: String,
    pub policy_store_token: Option<String>,

    // Threat backend
    pub threat_backend_url: String,
    pub threat_backend_token: Option<String>,

    // Remote scanner endpoint
    pub scanner_url: String,

    // Master toggle for the validation engine
    pub guardrails_enabled: bool,

    // Rate-limit KV binding; absence disables rate limiting
    pub redis_url: Option<String>,
    pub redis_pool_max_size: u32,
    pub redis_connection_timeout_secs: u64,
    pub redis_operation_timeout_secs: u64,

    // Optional mirror target for ingested batches
    pub runtime_mirror_url: Option<String>,

    // Logging configuration
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, GatewayError> {
        // Load .env file if present (development). Skip in tests to avoid
        // interfering with test environment variables.
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok();
        }

        let config = Self {
            bind_address: Self::get_env_or_default("BIND_ADDRESS", "0.0.0.0"),
            port: Self::parse_port()?,
            policy_store_url: Self::get_env_or_default(
                "DATABASE_ABSTRACTOR_SERVICE_URL",
                DEFAULT_POLICY_STORE_URL,
            ),
            policy_store_token: Self::get_optional_env("DATABASE_ABSTRACTOR_SERVICE_TOKEN"),
            threat_backend_url: Self::get_env_or_default(
                "THREAT_BACKEND_URL",
                DEFAULT_THREAT_BACKEND_URL,
            ),
            threat_backend_token: Self::get_optional_env("THREAT_BACKEND_TOKEN"),
            scanner_url: Self::get_env_or_default("SCANNER_URL", DEFAULT_SCANNER_URL),
            guardrails_enabled: Self::parse_bool_or_default("ENABLE_MCP_GUARDRAILS", true)?,
            redis_url: Self::get_optional_env("REDIS_URL"),
            redis_pool_max_size: Self::parse_u32_or_default("REDIS_POOL_MAX_SIZE", 10)?,
            redis_connection_timeout_secs: Self::parse_u64_or_default(
                "REDIS_CONNECTION_TIMEOUT_SECS",
                5,
            )?,
            redis_operation_timeout_secs: Self::parse_u64_or_default(
                "REDIS_OPERATION_TIMEOUT_SECS",
                2,
            )?,
            runtime_mirror_url: Self::get_optional_env("RUNTIME_MIRROR_URL"),
            log_level: Self::get_env_or_default("LOG_LEVEL", "info"),
            log_format: Self::get_env_or_default("LOG_FORMAT", "json"),
        };

        config.validate()?;

        Ok(config)
    }

    /// Get environment variable or return default value
    fn get_env_or_default(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get optional environment variable (empty counts as unset)
    fn get_optional_env(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    /// Parse port from PORT environment variable
    fn parse_port() -> Result<u16, GatewayError> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());
        let port = port_str.parse::<u16>().map_err(|e| {
            GatewayError::Configuration(format!("Invalid PORT value '{}': {}", port_str, e))
        })?;

        if port == 0 {
            return Err(GatewayError::Configuration(
                "PORT must be between 1 and 65535".to_string(),
            ));
        }

        Ok(port)
    }

    /// Parse boolean from environment variable or return default
    fn parse_bool_or_default(key: &str, default: bool) -> Result<bool, GatewayError> {
        match env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                other => Err(GatewayError::Configuration(format!(
                    "Invalid {} value '{}': must be true or false",
                    key, other
                ))),
            },
            _ => Ok(default),
        }
    }

    /// Parse u64 from environment variable or return default
    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, GatewayError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u64>().map_err(|e| {
                    GatewayError::Configuration(format!(
                        "Invalid {} value '{}': {}",
                        key, value, e
                    ))
                })?;

                if parsed == 0 {
                    return Err(GatewayError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    /// Parse u32 from environment variable or return default
    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, GatewayError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u32>().map_err(|e| {
                    GatewayError::Configuration(format!(
                        "Invalid {} value '{}': {}",
                        key, value, e
                    ))
                })?;

                if parsed == 0 {
                    return Err(GatewayError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }

                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    /// Validate all configuration values
    fn validate(&self) -> Result<(), GatewayError> {
        Self::validate_url(&self.policy_store_url, "Policy store URL")?;
        Self::validate_url(&self.threat_backend_url, "Threat backend URL")?;
        Self::validate_url(&self.scanner_url, "Scanner URL")?;

        if let Some(ref url) = self.redis_url {
            Self::validate_url(url, "Redis URL")?;
        }
        if let Some(ref url) = self.runtime_mirror_url {
            Self::validate_url(url, "Runtime mirror URL")?;
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    /// Validate URL format
    fn validate_url(url: &str, description: &str) -> Result<(), GatewayError> {
        url::Url::parse(url).map_err(|e| {
            GatewayError::Configuration(format!("Invalid {} '{}': {}", description, url, e))
        })?;
        Ok(())
    }

    /// Validate log level
    fn validate_log_level(level: &str) -> Result<(), GatewayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// Validate log format
    fn validate_log_format(format: &str) -> Result<(), GatewayError> {
        if format != "json" && format != "text" {
            return Err(GatewayError::Configuration(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration for unit tests
    ///
    /// Bypasses environment variable loading for tests that don't need
    /// real configuration.
    pub fn test_config() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            policy_store_url: DEFAULT_POLICY_STORE_URL.to_string(),
            policy_store_token: Some("test-token".to_string()),
            threat_backend_url: DEFAULT_THREAT_BACKEND_URL.to_string(),
            threat_backend_token: Some("test-threat-token".to_string()),
            scanner_url: DEFAULT_SCANNER_URL.to_string(),
            guardrails_enabled: true,
            redis_url: None,
            redis_pool_max_size: 10,
            redis_connection_timeout_secs: 5,
            redis_operation_timeout_secs: 2,
            runtime_mirror_url: None,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}
