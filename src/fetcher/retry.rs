//! Reusable retry driver with exponential backoff
//!
//! Kept independent of the HTTP layer so backoff behaviour can be exercised
//! without real network calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// How a failed attempt should be treated by [`with_retry`].
pub enum RetryClass<E> {
    /// Worth retrying (timeouts, 5xx, connection resets)
    Transient(E),
    /// Retrying will not help; surface immediately
    Fatal(E),
}

/// Backoff parameters for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Random fraction (0.0..=1.0) added on top of the computed delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay to apply after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let base_ms = self.base_delay.as_millis() as u64;
        let capped = base_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay.as_millis() as u64);
        let jitter_ms = if self.jitter > 0.0 {
            (capped as f64 * self.jitter * rand::random::<f64>()) as u64
        } else {
            0
        };
        Duration::from_millis(capped + jitter_ms)
    }
}

/// Drive `op` until it succeeds, fails fatally, or exhausts the policy.
///
/// `op` receives the 1-based attempt number. Transient failures sleep for
/// [`RetryPolicy::delay_for`] before the next attempt; fatal failures and
/// exhaustion return the underlying error unchanged.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryClass<E>>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(RetryClass::Fatal(err)) => {
                warn!("{}: giving up after attempt {}: {}", label, attempt, err);
                return Err(err);
            }
            Err(RetryClass::Transient(err)) => {
                if attempt >= policy.max_attempts {
                    warn!(
                        "{}: exhausted {} attempt(s): {}",
                        label, policy.max_attempts, err
                    );
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed: {}; retrying in {:?}",
                    label, attempt, policy.max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
