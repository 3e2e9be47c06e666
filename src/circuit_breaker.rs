use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::time::Duration;

/// Circuit breaker type guarding calls to the AQUA backend.
pub type BackendCircuitBreaker = StateMachine<ConsecutiveFailures<Exponential>, ()>;

/// Creates a circuit breaker for backend operations to prevent hammering a failing service.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// Calls are never retried: a failure still surfaces to the caller immediately, the breaker
/// only short-circuits the calls that follow while it is open.
pub fn create_backend_circuit_breaker() -> BackendCircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_backend_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("backend 500"));
            assert!(result.is_err());
        }

        assert!(!cb.is_call_permitted());
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));
        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_manual_outcome_reporting() {
        let cb = create_backend_circuit_breaker();

        for _ in 0..4 {
            assert!(cb.is_call_permitted());
            cb.on_error();
        }
        cb.on_success();
        cb.on_error();

        // A success in between resets the consecutive count
        assert!(cb.is_call_permitted());
    }
}
