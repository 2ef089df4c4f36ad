//! Per-adapter circuit breakers.
//!
//! Breaker state is shared across requests: a backend that keeps failing
//! is short-circuited for everyone until the recovery window elapses.
//! State updates happen under one lock per breaker, so success/failure
//! accounting is atomic with respect to concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::QuorumErr;
use crate::error::Result;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast.
    Open,
    /// A bounded number of probe calls are admitted.
    HalfOpen,
}

/// Breaker tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds to wait after the last failure before probing again.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
    /// Probe calls admitted while half-open.
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout() -> u64 {
    30
}
fn default_half_open_requests() -> u32 {
    1
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

impl BreakerConfig {
    fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_count: u32,
}

/// Circuit breaker for one adapter.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
                half_open_count: 0,
            }),
        }
    }

    /// Current state, resolving an elapsed recovery window.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Admit or reject a call.
    ///
    /// Open circuits transition to half-open once the recovery timeout
    /// has elapsed since the last failure; half-open circuits admit at
    /// most `half_open_requests` probes.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);
                let recovery = self.config.recovery_timeout();
                if elapsed >= recovery {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_count = 1;
                    info!(adapter = %self.name, "circuit breaker entering half-open state");
                    Ok(())
                } else {
                    Err(QuorumErr::CircuitOpen {
                        adapter: self.name.clone(),
                        retry_in: recovery - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_count < self.config.half_open_requests {
                    inner.half_open_count += 1;
                    Ok(())
                } else {
                    Err(QuorumErr::CircuitOpen {
                        adapter: self.name.clone(),
                        retry_in: self.config.recovery_timeout(),
                    })
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            info!(adapter = %self.name, "circuit breaker closed after successful recovery");
        }
        inner.failure_count = 0;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!(adapter = %self.name, "circuit breaker reopened after half-open failure");
            }
            BreakerState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = BreakerState::Open;
                warn!(
                    adapter = %self.name,
                    failures = inner.failure_count,
                    "circuit breaker opened"
                );
            }
            _ => {}
        }
    }

    /// Run `op` under the breaker, recording the outcome.
    pub async fn run<T, Fut>(&self, op: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.try_acquire()?;
        match op.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide registry handing out one breaker per adapter name.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `name`, creating it on first use.
    pub fn breaker_for(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut map = self
            .breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| {
                debug!(adapter = name, "creating circuit breaker");
                Arc::new(CircuitBreaker::new(name, self.config.clone()))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_secs: recovery_secs,
                half_open_requests: 1,
            },
        )
    }

    #[test]
    fn opens_at_exactly_the_threshold() {
        let breaker = breaker(3, 60);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_matches!(breaker.try_acquire(), Err(QuorumErr::CircuitOpen { .. }));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = breaker(3, 60);
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn open_transitions_to_half_open_after_recovery() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Zero recovery timeout: the next acquire is a half-open probe.
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Probe budget (1) is spent.
        assert_matches!(breaker.try_acquire(), Err(QuorumErr::CircuitOpen { .. }));
    }

    #[test]
    fn half_open_success_closes() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        assert!(breaker.try_acquire().is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = breaker(1, 0);
        breaker.record_failure();
        assert!(breaker.try_acquire().is_ok());
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn run_records_outcomes() {
        let breaker = breaker(1, 60);
        let ok: Result<u32> = breaker.run(async { Ok(1) }).await;
        assert_eq!(ok.expect("ok"), 1);

        let err: Result<u32> = breaker
            .run(async { Err(QuorumErr::Connection("x".into())) })
            .await;
        assert!(err.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);

        // Rejected without invoking the operation.
        let rejected: Result<u32> = breaker.run(async { Ok(2) }).await;
        assert_matches!(rejected, Err(QuorumErr::CircuitOpen { .. }));
    }

    #[test]
    fn registry_returns_the_same_breaker_per_name() {
        let registry = BreakerRegistry::default();
        let a = registry.breaker_for("claude");
        let b = registry.breaker_for("claude");
        assert!(Arc::ptr_eq(&a, &b));
        let c = registry.breaker_for("gemini");
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
