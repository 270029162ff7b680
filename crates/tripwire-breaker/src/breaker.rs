//! A single dependency's circuit breaker.
//!
//! State machine:
//!
//!   Closed ──(failure_threshold consecutive failures)──▶ Open
//!   Open ──(timeout elapsed, next call)──▶ HalfOpen
//!   HalfOpen ──(success_threshold consecutive successes)──▶ Closed
//!   HalfOpen ──(any failure)──▶ Open (opened_at reset)
//!
//! The mutex guards only the state fields. It is released before the
//! wrapped operation is awaited and re-taken to record the result.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use tripwire_contracts::{
    circuit::{CircuitState, CircuitStatus},
    error::{TripwireError, TripwireResult},
};
use tripwire_core::{
    clock::{elapsed_between, Clock},
    traits::MetricsSink,
};

use crate::config::BreakerConfig;

#[derive(Debug)]
struct Inner {
    status: CircuitStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<DateTime<Utc>>,
    half_open_in_flight: u32,
}

/// Circuit breaker for one dependency key.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    pub fn new(
        dependency: impl Into<String>,
        config: BreakerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let dependency = dependency.into();
        metrics.circuit_state_changed(&dependency, CircuitStatus::Closed);
        Self {
            dependency,
            config,
            clock,
            metrics,
            inner: Mutex::new(Inner {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// If the breaker rejects the call, `op` is never invoked and
    /// `DependencyUnavailable` is returned. Otherwise `op`'s result is passed
    /// through unchanged after being recorded: `Ok` as a success, any `Err`
    /// as a failure.
    pub async fn call<T, F, Fut>(&self, op: F) -> TripwireResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TripwireResult<T>>,
    {
        let permit = self.acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => permit.succeed(),
            Err(err) => permit.fail(err),
        }
        result
    }

    /// Ask for permission to make one call.
    ///
    /// The returned permit must be resolved with `succeed` or `fail`. A
    /// permit dropped unresolved (e.g. the caller's future was cancelled)
    /// hands its half-open trial slot back without counting either way.
    pub fn acquire(&self) -> TripwireResult<Permit<'_>> {
        let now = self.clock.now();
        let mut inner = self.lock();

        let status = inner.status;
        match status {
            CircuitStatus::Closed => Ok(Permit::new(self, false)),
            CircuitStatus::Open => {
                let remaining = self.remaining_open(&inner, now);
                if remaining.is_zero() {
                    inner.status = CircuitStatus::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 1;
                    drop(inner);
                    info!(dependency = %self.dependency, "circuit half-open, admitting trial call");
                    self.metrics
                        .circuit_state_changed(&self.dependency, CircuitStatus::HalfOpen);
                    Ok(Permit::new(self, true))
                } else {
                    debug!(
                        dependency = %self.dependency,
                        retry_after_secs = ceil_secs(remaining),
                        "circuit open, call rejected"
                    );
                    Err(TripwireError::DependencyUnavailable {
                        dependency: self.dependency.clone(),
                        retry_after_secs: ceil_secs(remaining),
                    })
                }
            }
            CircuitStatus::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(Permit::new(self, true))
                } else {
                    debug!(dependency = %self.dependency, "half-open trial slots busy, call rejected");
                    Err(TripwireError::DependencyUnavailable {
                        dependency: self.dependency.clone(),
                        retry_after_secs: 1,
                    })
                }
            }
        }
    }

    /// Fail fast with `DependencyUnavailable` while the breaker is open and
    /// its timeout has not elapsed. Takes no permit and changes no state.
    pub fn check(&self) -> TripwireResult<()> {
        let now = self.clock.now();
        let inner = self.lock();
        if inner.status != CircuitStatus::Open {
            return Ok(());
        }
        let remaining = self.remaining_open(&inner, now);
        if remaining.is_zero() {
            return Ok(());
        }
        Err(TripwireError::DependencyUnavailable {
            dependency: self.dependency.clone(),
            retry_after_secs: ceil_secs(remaining),
        })
    }

    /// A point-in-time copy of this breaker's state.
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let inner = self.lock();
        let retry_after_secs = match inner.status {
            CircuitStatus::Open => ceil_secs(self.remaining_open(&inner, now)),
            _ => 0,
        };
        CircuitState {
            dependency: self.dependency.clone(),
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            opened_at: inner.opened_at,
            retry_after_secs,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.lock().status
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        let status = inner.status;
        match status {
            CircuitStatus::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitStatus::HalfOpen if trial => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.status = CircuitStatus::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.half_open_in_flight = 0;
                    drop(inner);
                    info!(dependency = %self.dependency, "circuit closed, dependency recovered");
                    self.metrics
                        .circuit_state_changed(&self.dependency, CircuitStatus::Closed);
                }
            }
            // A call admitted before a concurrent transition; nothing to count.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool, err: &TripwireError) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let status = inner.status;
        match status {
            CircuitStatus::Closed => {
                inner.consecutive_failures += 1;
                debug!(
                    dependency = %self.dependency,
                    consecutive_failures = inner.consecutive_failures,
                    error = %err,
                    "dependency call failed"
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    self.trip(&mut inner, now);
                    drop(inner);
                    warn!(
                        dependency = %self.dependency,
                        consecutive_failures = failures,
                        timeout_secs = self.config.timeout_secs,
                        "circuit opened"
                    );
                    self.metrics.circuit_state_changed(&self.dependency, CircuitStatus::Open);
                }
            }
            CircuitStatus::HalfOpen if trial => {
                inner.consecutive_failures += 1;
                self.trip(&mut inner, now);
                drop(inner);
                warn!(dependency = %self.dependency, error = %err, "trial call failed, circuit reopened");
                self.metrics.circuit_state_changed(&self.dependency, CircuitStatus::Open);
            }
            _ => {}
        }
    }

    fn release(&self) {
        let mut inner = self.lock();
        if inner.status == CircuitStatus::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn trip(&self, inner: &mut Inner, now: DateTime<Utc>) {
        inner.status = CircuitStatus::Open;
        inner.opened_at = Some(now);
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
    }

    fn remaining_open(&self, inner: &Inner, now: DateTime<Utc>) -> Duration {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match inner.opened_at {
            Some(opened_at) => timeout.saturating_sub(elapsed_between(opened_at, now)),
            None => Duration::ZERO,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Permission to make one call through a breaker.
#[must_use = "a permit must be resolved with succeed() or fail()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    /// True if this is a half-open trial call.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self, err: &TripwireError) {
        self.resolved = true;
        self.breaker.on_failure(self.trial, err);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.release();
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
