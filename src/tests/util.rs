//! Utilities for tests.

use std::time::Duration;

use env_logger::Env;

/// Tries to enable logging. Intended for use in tests.
///
/// Accepts a log level name as a string, e.g. "trace".
#[allow(dead_code)]
pub(crate) fn enable_logging(log_level: &str) {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .is_test(true)
        .try_init();
}

/// Wait until a condition holds, polling every few milliseconds.
///
/// Panics if it does not hold within `limit`.
pub(crate) async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let step = Duration::from_millis(20);
    let mut waited = Duration::ZERO;
    while !cond() {
        assert!(waited < limit, "condition not met within {limit:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}
