use failsafe::{backoff, failure_policy, Config};
use std::time::Duration;

/// Creates a circuit breaker for one external source within a pipeline run.
///
/// A stage checks `is_call_permitted()` before each per-property fetch and
/// records the outcome afterwards; once a source trips the breaker the rest
/// of the batch is skipped instead of timing out property by property. The
/// skipped properties keep their null fields and are candidates again on the
/// next run.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
pub fn create_source_circuit_breaker() -> impl failsafe::CircuitBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

/// Feeds one async fetch outcome into a breaker. The failure policy only
/// counts outcomes reported through `call`, so stages report success or
/// failure here after the await completes.
pub fn record_outcome<B: failsafe::CircuitBreaker>(breaker: &B, ok: bool) {
    let _ = breaker.call(|| if ok { Ok::<(), ()>(()) } else { Err(()) });
}
