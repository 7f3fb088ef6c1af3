//! Backoff schedules and failure tracking for queue-level retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Delay schedule between attempts of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential {
        #[serde(with = "millis")]
        base: Duration,
        #[serde(with = "millis")]
        max: Duration,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Doubling backoff capped at one hour.
    pub fn exponential(base: Duration) -> Self {
        Self::Exponential {
            base,
            max: Duration::from_secs(3600),
        }
    }

    /// Delay before the retry that follows `attempts_made` failed attempts.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempts_made.saturating_sub(1).min(31);
                base.saturating_mul(2u32.pow(exponent)).min(max)
            }
        }
    }
}

/// Transport reconnect delay: `first * 2^(attempt - 1)`, capped at `max`.
pub fn reconnect_delay(attempt: u32, first: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    first.saturating_mul(2u32.pow(exponent)).min(max)
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Background loops (keep-alive pings, consumer polls) use this to stop
/// flooding the log after the first few consecutive failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
