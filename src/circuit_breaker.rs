use failsafe::{backoff, failure_policy, CircuitBreaker, Config, StateMachine};
use std::time::Duration;

/// Breaker guarding outbound CRM calls.
pub type CrmBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for CRM calls to stop hammering a failing CRM.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transport or 5xx failures trigger OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// A rejected lead says nothing about CRM health and never counts.
pub fn create_crm_circuit_breaker() -> CrmBreaker {
    crm_circuit_breaker(5, Duration::from_secs(10), Duration::from_secs(60))
}

/// Breaker opening after `threshold` consecutive failures, half-opening after
/// an exponential backoff between `initial` and `max`.
pub fn crm_circuit_breaker(threshold: u32, initial: Duration, max: Duration) -> CrmBreaker {
    let backoff_strategy = backoff::exponential(initial, max);
    let failure_policy = failure_policy::consecutive_failures(threshold, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Feeds the outcome of an async call into the breaker and hands it back
/// unchanged. `counts_as_failure` decides which errors trip the breaker.
pub fn record_outcome<T, E>(
    breaker: &CrmBreaker,
    outcome: Result<T, E>,
    counts_as_failure: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let failed = outcome.as_ref().err().map(counts_as_failure).unwrap_or(false);
    let _ = breaker.call(|| if failed { Err(()) } else { Ok(()) });
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_opens_after_transient_failures() {
        let cb = create_crm_circuit_breaker();

        for _ in 0..5 {
            let result: Result<(), &str> = record_outcome(&cb, Err("timeout"), |_| true);
            assert!(result.is_err());
        }

        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_breaker_half_opens_after_backoff() {
        let cb = crm_circuit_breaker(1, Duration::from_millis(10), Duration::from_millis(20));

        let _: Result<(), &str> = record_outcome(&cb, Err("timeout"), |_| true);
        assert!(!cb.is_call_permitted());

        std::thread::sleep(Duration::from_millis(30));
        assert!(cb.is_call_permitted());
    }

    #[test]
    fn test_non_counting_errors_keep_circuit_closed() {
        let cb = create_crm_circuit_breaker();

        for _ in 0..10 {
            let _: Result<(), &str> = record_outcome(&cb, Err("rejected"), |_| false);
        }

        assert!(cb.is_call_permitted());
        let ok: Result<i32, &str> = record_outcome(&cb, Ok(42), |_| true);
        assert_eq!(ok.unwrap(), 42);
    }
}
