//! Ledger lock retry
//!
//! SQLite reports contention as "database is locked" / "database is busy".
//! Claims are retried with exponential backoff until the configured lock
//! wait elapses; the caller then fails closed.

use std::time::{Duration, Instant};
use themebank_common::{Error, Result};

/// First and maximum sleep between attempts
const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Successes slower than this are logged at WARN
const SLOW_CLAIM_MS: u128 = 2000;

/// Run `operation` until it succeeds, fails with something other than lock
/// contention, or `max_wait_ms` of contention has passed.
///
/// Sleeps start at 10 ms and double up to 1 s. Giving up yields
/// `Error::Internal`, which claim callers turn into "already taken".
pub async fn retry_on_lock<F, Fut, T>(caller: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let started = Instant::now();
    let deadline = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    let waited_ms = started.elapsed().as_millis();
                    if waited_ms > SLOW_CLAIM_MS {
                        tracing::warn!(caller, attempts, waited_ms, "Ledger claim needed a long lock wait");
                    } else {
                        tracing::debug!(caller, attempts, waited_ms, "Ledger claim succeeded after lock wait");
                    }
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= deadline {
            tracing::error!(caller, attempts, waited_ms = waited.as_millis(), max_wait_ms, error = %err, "Giving up on locked ledger");
            return Err(Error::Internal(format!(
                "{}: ledger still locked after {} attempts over {} ms",
                caller,
                attempts,
                waited.as_millis()
            )));
        }

        tracing::debug!(caller, attempts, backoff_ms, "Ledger locked, backing off");
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
