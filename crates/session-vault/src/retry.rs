//! Retry with capped exponential backoff and jitter.
//!
//! Remote backends route every network call through [`with_retry`]. The
//! caller injects an `is_retryable` predicate, so the policy is identical
//! across backends regardless of which client library produced the error.
//! Local disk I/O never goes through here; local failures are not transient
//! in the network sense.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Uncapped exponential delay for a 0-indexed attempt, before jitter.
fn exponential_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let multiplier = 2f64.powi(attempt as i32);
    let secs = policy.base_delay.as_secs_f64() * multiplier;
    Duration::from_secs_f64(secs.min(policy.max_delay.as_secs_f64()))
}

/// Delay actually slept before the next attempt: the capped exponential
/// scaled by a random jitter factor in `[0.5, 1.0)`.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let capped = exponential_delay(policy, attempt);
    let jitter = rand::rng().random_range(0.5..1.0);
    Duration::from_secs_f64(capped.as_secs_f64() * jitter)
}

/// Run `f` up to `policy.max_attempts` times.
///
/// A failure for which `is_retryable` returns `false` is returned
/// immediately after a single attempt. Retryable failures back off
/// exponentially (capped, jittered) between attempts; once the budget is
/// exhausted the last error is returned for the caller to wrap.
pub async fn with_retry<T, E, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    debug!(operation, error = %err, "permanent failure, not retrying");
                    return Err(err);
                }
                if attempt + 1 >= max_attempts {
                    warn!(
                        operation,
                        attempts = max_attempts,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                let delay = backoff_delay(policy, attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns from within")
}
