use crate::core::errors::GatewayError;
use failsafe::futures::CircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error, StateMachine};
use std::time::Duration;

/// Standard circuit breaker type for gateway egress
///
/// Policy:
/// - 5 consecutive failures triggers OPEN state
/// - 5 seconds cool-down period before HALF-OPEN (retry)
pub type EgressCircuitBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Constant>, ()>;

/// Create a new standard circuit breaker instance
pub fn create_circuit_breaker() -> EgressCircuitBreaker {
    Config::new()
        .failure_policy(failure_policy::consecutive_failures(
            5,
            backoff::constant(Duration::from_secs(5)),
        ))
        .build()
}

/// Execute a fallible async operation within circuit breaker protection
///
/// Handles circuit state checks (Closed/Open/Half-Open), failure counting,
/// and error mapping to GatewayError::Transient when the circuit is open.
pub async fn execute_with_cb<F, Fut, T, E>(
    cb: &EgressCircuitBreaker,
    service: &str,
    operation: F,
) -> Result<T, GatewayError>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
{
    match cb.call(operation()).await {
        Ok(val) => Ok(val),
        Err(Error::Inner(e)) => Err(GatewayError::DependencyFailure {
            service: service.to_string(),
            error: e.to_string(),
        }),
        Err(Error::Rejected) => Err(GatewayError::Transient(
            "Circuit Breaker Open: Service Unavailable".to_string(),
        )),
    }
}
