use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay ceiling between attempts, applied after backoff growth.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded-retry configuration carried by every uploader instance.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Attempt count is clamped to at least one; a policy can bound retries
    /// but never silently disable the operation itself.
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Runs `op` up to `policy.attempts` times, re-raising the last error once
/// attempts are exhausted.
///
/// Between attempts, waits `base * 2^attempt + uniform(0, base)` — exponential
/// backoff with additive jitter so concurrent callers do not retry in
/// lockstep. Cancellation through `token` interrupts both an in-flight
/// attempt and an inter-attempt wait, and propagates immediately without
/// further retries.
///
/// Every error is retryable at this layer; callers decide what is worth
/// retrying by how they classify HTTP statuses before returning `Err`.
pub async fn retry<T, F, Fut>(
    policy: RetryPolicy,
    token: &CancellationToken,
    mut op: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        if token.is_cancelled() {
            anyhow::bail!("operation cancelled");
        }

        let result = tokio::select! {
            () = token.cancelled() => anyhow::bail!("operation cancelled"),
            res = op() => res,
        };

        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "operation recovered after retries");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt + 1 < attempts {
                    let delay = backoff_delay(policy.base_delay, attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "attempt failed, retrying: {e:#}"
                    );
                    tokio::select! {
                        () = token.cancelled() => anyhow::bail!("operation cancelled"),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => anyhow::bail!("retry budget exhausted without running the operation"),
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter = base.mul_f64(rand::rng().random_range(0.0..1.0));
    exponential.saturating_add(jitter).min(MAX_BACKOFF)
}
