//! Retry engine with exponential backoff and `Retry-After` honoring.
//!
//! Wraps a single provider call (including its rate-gate acquisition, so
//! every physical attempt is re-admitted).  Policy:
//!
//! | Outcome | Action |
//! |---|---|
//! | Success | return |
//! | 429 with `Retry-After: s` | sleep exactly `s`, then retry |
//! | 429 without header | exponential backoff, base 1 s, factor 2, cap 30 s, ±20 % jitter |
//! | 5xx / network / timeout | exponential backoff as above |
//! | 4xx other than 429 | non-retryable, surfaced as `BadRequest` |
//! | 401/403 | non-retryable, surfaced as `AuthFailed` |
//!
//! Every 429 is reported to the spike detector whether or not the retry
//! eventually succeeds, and the total budget never exceeds the caller
//! deadline.

use log::{debug, warn};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::squadron::error::FailureKind;
use crate::squadron::rate::throttle::AdaptiveThrottle;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (first call included).
    pub max_attempts: u32,
    /// Initial backoff delay.
    pub base_delay: Duration,
    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,
    /// Random jitter applied to each delay (0.0 to 1.0, fraction of delay).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for the given 0-based attempt: exponential growth, capped, with
    /// symmetric jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponential = base_ms * 2f64.powi(attempt as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::thread_rng().gen::<f64>() * jitter_range;
        let final_ms = capped + jitter - jitter_range / 2.0;

        Duration::from_millis(final_ms.max(0.0) as u64)
    }
}

/// Retry `operation` per the policy, reporting 429s to the spike detector.
///
/// `operation` is invoked at most `max_attempts` times; between attempts the
/// engine sleeps the `Retry-After` value when present, otherwise the
/// exponential backoff.  Sleeping never crosses `deadline`: when the next
/// delay would, the last classified failure is returned instead.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: &str,
    configured_rpm: u32,
    throttle: &AdaptiveThrottle,
    deadline: Instant,
    mut operation: F,
) -> Result<T, FailureKind>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FailureKind>>,
{
    let mut last_failure: Option<FailureKind> = None;

    for attempt in 0..policy.max_attempts {
        if Instant::now() >= deadline {
            return Err(last_failure.unwrap_or(FailureKind::CancelledByCaller));
        }

        match operation().await {
            Ok(result) => {
                if let Err(e) = throttle.record_success(provider, configured_rpm).await {
                    warn!("failed to record success for '{}': {}", provider, e);
                }
                return Ok(result);
            }
            Err(failure) => {
                if let FailureKind::RateLimited { .. } = &failure {
                    if let Err(e) = throttle.record_429(provider, configured_rpm).await {
                        warn!("failed to record 429 for '{}': {}", provider, e);
                    }
                }

                if matches!(failure, FailureKind::CancelledByCaller) || !failure.is_retryable() {
                    return Err(failure);
                }

                debug!(
                    "attempt {}/{} against '{}' failed: {}",
                    attempt + 1,
                    policy.max_attempts,
                    provider,
                    failure.code()
                );

                let delay = match &failure {
                    FailureKind::RateLimited {
                        retry_after: Some(after),
                    } => *after,
                    _ => policy.backoff_delay(attempt),
                };
                last_failure = Some(failure);

                // Don't sleep after the last attempt, and never past the deadline.
                if attempt + 1 < policy.max_attempts {
                    if Instant::now() + delay >= deadline {
                        return Err(last_failure.unwrap_or(FailureKind::CancelledByCaller));
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_failure.unwrap_or(FailureKind::CancelledByCaller))
}
