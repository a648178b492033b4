//! # Bounded Retry
//!
//! A reusable bounded-retry-with-backoff helper for flaky remote calls.
//! One policy object, one entry point; call sites no longer hand-roll
//! attempt loops with manual delays.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

// =============================================================================
// Policy
// =============================================================================

/// Bounds for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub initial_backoff: Duration,

    /// Delay ceiling.
    pub max_backoff: Duration,

    /// Backoff growth factor.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Entry Point
// =============================================================================

/// Runs `op` until it succeeds or the attempt budget is spent, sleeping
/// with exponential backoff between attempts. Returns the last error when
/// every attempt fails.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    let attempts = policy.max_attempts.max(1);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(label, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(err) if attempt < attempts => {
                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                debug!(label, attempt, %err, ?delay, "Attempt failed, backing off");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(label, attempts, %err, "All attempts failed");
                return Err(err);
            }
        }
    }

    unreachable!("retry loop always returns within the attempt budget")
}

// =============================================================================
// Unit Tests
// =============================================================================
