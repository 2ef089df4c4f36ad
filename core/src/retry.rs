//! Exponential backoff with jitter.
//!
//! Only error kinds declared retriable are re-attempted; rate-limit
//! errors use their own, slower schedule. Every retry is logged at
//! warning and terminal failure at error, so operators can see flapping
//! backends without raising verbosity.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::warn;

use crate::error::QuorumErr;
use crate::error::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff (ms).
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Maximum delay cap (ms).
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Backoff multiplier.
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
    /// Add a uniform random amount in `[0, 0.25·delay)` to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_exponential_base() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            exponential_base: default_exponential_base(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// A config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set maximum retry attempts.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry `attempt` (0-indexed): `min(max_delay,
    /// base_delay · exponential_base^attempt)`, plus jitter when enabled.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let mut delay_ms = base * self.exponential_base.powi(attempt as i32);
        delay_ms = delay_ms.min(self.max_delay_ms as f64);

        if self.jitter {
            delay_ms += delay_ms * rand::rng().random_range(0.0..0.25);
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before retry `attempt` after a rate-limit error:
    /// `min(30 s, base_delay · 3^attempt)`.
    pub fn rate_limit_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64;
        let delay_ms = (base * 3f64.powi(attempt as i32)).min(30_000.0);
        Duration::from_millis(delay_ms as u64)
    }

    /// Pick the schedule appropriate for `err`.
    fn delay_for(&self, err: &QuorumErr, attempt: u32) -> Duration {
        if err.is_rate_limit() {
            err.retry_delay()
                .unwrap_or_else(|| self.rate_limit_delay(attempt))
        } else {
            self.backoff_delay(attempt)
        }
    }
}

/// Run `op` up to `max_retries + 1` times.
///
/// Non-retriable errors are returned immediately. `op_name` labels log
/// lines only.
pub async fn run_with_retry<T, F, Fut>(config: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                let delay = config.delay_for(&err, attempt);
                warn!(
                    operation = op_name,
                    attempt = attempt + 1,
                    max = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %err,
                    "retrying after error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    error!(
                        operation = op_name,
                        attempts = config.max_retries + 1,
                        %err,
                        "all retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
    Err(QuorumErr::Internal(format!("{op_name}: retry loop exited")))
}
