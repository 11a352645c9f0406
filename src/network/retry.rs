//! Exponential backoff with jitter

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::types::{NetworkError, RetryConfig};

/// Jitter applied around the exponential delay (±25 %)
const JITTER_FACTOR: f64 = 0.25;

/// Delay before retry number `attempt` (0-based)
///
/// `initial_delay × multiplier^attempt`, scaled by a random factor in
/// `[1 - 0.25, 1 + 0.25]`, capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_delay.as_secs_f64() * config.multiplier.powi(attempt as i32);
    let jitter = rand::thread_rng().gen_range(-JITTER_FACTOR..=JITTER_FACTOR);
    let jittered = (base * (1.0 + jitter)).max(0.0);

    let max = config.max_delay.as_secs_f64();
    if !jittered.is_finite() || jittered >= max {
        config.max_delay
    } else {
        Duration::from_secs_f64(jittered)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries are spent. At most `max_retries + 1` calls are made.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    url: &str,
    mut operation: F,
) -> Result<T, NetworkError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NetworkError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) if attempt >= config.max_retries => {
                tracing::warn!(
                    url = %url,
                    attempts = attempt + 1,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let delay = backoff_delay(config, attempt);
                tracing::debug!(
                    url = %url,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying fetch"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
