//! Bounded retry with exponential backoff and jitter.
//!
//! Only errors classified as [`ErrorClass::Retriable`](crate::ErrorClass) are
//! retried; everything else is returned on the first failure.

use crate::{ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, the first try included.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter as a percentage of the delay (0..=100).
    pub jitter_ratio_pct: u32,
}

impl RetryPolicy {
    /// Policy that tries exactly once.
    pub const NO_RETRY: Self = Self {
        max_attempts: 1,
        base_delay_ms: 0,
        max_delay_ms: 0,
        jitter_ratio_pct: 0,
    };

    /// Un-jittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn base_backoff(self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay after the given failed attempt, with jitter applied.
    #[must_use]
    pub fn backoff(self, attempt: u32) -> Duration {
        let capped = u64::try_from(self.base_backoff(attempt).as_millis()).unwrap_or(u64::MAX);
        let jitter_pct = u64::from(self.jitter_ratio_pct.min(100));
        if jitter_pct == 0 || capped == 0 {
            return Duration::from_millis(capped);
        }

        let spread = capped.saturating_mul(jitter_pct) / 100;
        // Offset in [-spread, +spread].
        let roll = jitter_seed(attempt) % (spread.saturating_mul(2).saturating_add(1));
        let jittered = capped
            .saturating_add(roll)
            .saturating_sub(spread)
            .min(self.max_delay_ms);
        Duration::from_millis(jittered)
    }
}

/// Retry a fallible async operation under `policy`.
pub async fn retry_async<T, F, Fut>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_async_with_observer(ctx, policy, operation, &mut op, |_, _, _| {}).await
}

/// Retry with a callback invoked before each backoff sleep.
///
/// The observer receives the failed attempt number, the error and the delay
/// about to be slept.
pub async fn retry_async_with_observer<T, F, Fut, Obs>(
    ctx: &RequestContext,
    policy: RetryPolicy,
    operation: &'static str,
    op: &mut F,
    mut on_retry: Obs,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    Obs: FnMut(u32, &ErrorEnvelope, Duration),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        ctx.ensure_not_cancelled(operation)?;

        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if !error.is_retriable() || attempt >= max_attempts {
            return Err(error.with_metadata("attempts", attempt.to_string()));
        }

        let delay = policy.backoff(attempt);
        on_retry(attempt, &error, delay);
        tokio::select! {
            () = ctx.cancelled() => {
                return Err(ErrorEnvelope::cancelled("operation cancelled")
                    .with_metadata("operation", operation));
            }
            () = tokio::time::sleep(delay) => {}
        }
    }
}

fn jitter_seed(attempt: u32) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| u64::from(duration.subsec_nanos()));
    nanos ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
