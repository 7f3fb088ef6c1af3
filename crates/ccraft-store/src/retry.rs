//! Retry policy for record store requests.
//!
//! Network failures, 5xx and 429 are retried. A 429 waits for the gateway's
//! `Retry-After` (capped); everything else backs off exponentially with equal
//! jitter, so every wait lies between half and all of the capped delay.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{info_span, warn, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum backoff delay (in milliseconds).
    pub max_delay_ms: u64,
    /// Longest `Retry-After` honored (in milliseconds).
    pub max_retry_after_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5000,
            max_retry_after_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_or("DATABASE_MAX_RETRIES", defaults.max_retries),
            base_delay_ms: env_or("DATABASE_RETRY_BASE_MS", defaults.base_delay_ms),
            max_delay_ms: env_or("DATABASE_RETRY_MAX_MS", defaults.max_delay_ms),
            max_retry_after_ms: env_or("DATABASE_RETRY_AFTER_MAX_MS", defaults.max_retry_after_ms),
        }
    }

    /// Wait before retry number `attempt + 1` after `error`.
    pub fn delay_for(&self, attempt: u32, error: &StoreError) -> Duration {
        if let Some(after) = error.retry_after_ms() {
            return Duration::from_millis(after.min(self.max_retry_after_ms));
        }

        let capped = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(self.max_delay_ms);
        let half = capped / 2;
        Duration::from_millis(half + jitter(capped - half))
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Pseudo-random value in `0..=max` from the clock's sub-second part.
fn jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos % (max + 1)
}

/// Execute an async operation, retrying transient failures.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    loop {
        let span = info_span!("store_retry", operation = %operation, attempt = attempt + 1);
        let error = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !error.is_retryable() || attempt >= config.max_retries {
            return Err(error);
        }

        let delay = config.delay_for(attempt, &error);
        warn!(
            operation = %operation,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Record store operation failed, retrying: {}",
            error
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
