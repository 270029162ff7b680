//! # tripwire-breaker
//!
//! Per-dependency circuit breakers for the tripwire agent guard.
//!
//! A [`BreakerRegistry`] owns one [`CircuitBreaker`] per dependency key.
//! Every workflow shares the registry, so one flaky dependency is isolated
//! for all of them at once. State transitions are short critical sections;
//! the wrapped call itself runs outside any lock.
//!
//! ```rust,ignore
//! let registry = BreakerRegistry::with_settings(BreakerSettings::default());
//! let report = registry.call("orchestrator", || executor.execute(&req)).await?;
//! ```

pub mod breaker;
pub mod config;
pub mod registry;

pub use breaker::{CircuitBreaker, Permit};
pub use config::{BreakerConfig, BreakerProfile, BreakerSettings, DependencyOverride};
pub use registry::BreakerRegistry;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tripwire_contracts::{
        circuit::CircuitStatus,
        error::{TripwireError, TripwireResult},
    };
    use tripwire_core::{clock::ManualClock, traits::MetricsSink};

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    #[derive(Default)]
    struct RecordingMetrics {
        transitions: Mutex<Vec<(String, CircuitStatus)>>,
    }

    impl MetricsSink for RecordingMetrics {
        fn circuit_state_changed(&self, dependency: &str, status: CircuitStatus) {
            self.transitions
                .lock()
                .unwrap()
                .push((dependency.to_string(), status));
        }
    }

    fn breaker(clock: &Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new(
            "orchestrator",
            BreakerConfig::default(),
            clock.clone(),
            Arc::new(RecordingMetrics::default()),
        )
    }

    fn failure() -> TripwireError {
        TripwireError::ActionFailed {
            action: "restart".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    async fn fail_once(b: &CircuitBreaker) -> TripwireResult<()> {
        b.call(|| async { Err::<(), _>(failure()) }).await
    }

    async fn succeed_once(b: &CircuitBreaker) -> TripwireResult<()> {
        b.call(|| async { Ok(()) }).await
    }

    /// Fails on calls 1-5, then returns the call number.
    async fn flaky_call(registry: &BreakerRegistry, calls: Arc<Mutex<u32>>) -> TripwireResult<u32> {
        registry
            .call("payments", move || async move {
                let mut n = calls.lock().unwrap();
                *n += 1;
                if *n <= 5 {
                    Err(failure())
                } else {
                    Ok(*n)
                }
            })
            .await
    }

    // ── 1. closed → open ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_without_calling() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);

        for _ in 0..4 {
            assert!(matches!(fail_once(&b).await, Err(TripwireError::ActionFailed { .. })));
            assert_eq!(b.status(), CircuitStatus::Closed);
        }
        let _ = fail_once(&b).await;
        assert_eq!(b.status(), CircuitStatus::Open);

        let invoked = Arc::new(Mutex::new(0));
        let counter = invoked.clone();
        let result = b
            .call(|| async move {
                *counter.lock().unwrap() += 1;
                Ok(())
            })
            .await;

        match result {
            Err(TripwireError::DependencyUnavailable { dependency, retry_after_secs }) => {
                assert_eq!(dependency, "orchestrator");
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("expected DependencyUnavailable, got {other:?}"),
        }
        assert_eq!(*invoked.lock().unwrap(), 0, "open breaker must not invoke the call");
    }

    #[tokio::test]
    async fn success_in_closed_resets_failure_count() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);

        for _ in 0..4 {
            let _ = fail_once(&b).await;
        }
        succeed_once(&b).await.unwrap();
        assert_eq!(b.state().consecutive_failures, 0);

        for _ in 0..4 {
            let _ = fail_once(&b).await;
        }
        assert_eq!(b.status(), CircuitStatus::Closed);
    }

    // ── 2. open → half-open ───────────────────────────────────────────────────

    #[tokio::test]
    async fn admits_exactly_one_trial_after_timeout() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);
        for _ in 0..5 {
            let _ = fail_once(&b).await;
        }

        clock.advance(Duration::from_secs(59));
        assert!(b.acquire().is_err());
        assert_eq!(b.state().retry_after_secs, 1);

        clock.advance(Duration::from_secs(1));
        let trial = b.acquire().expect("first post-timeout call is admitted");
        assert!(trial.is_trial());
        assert_eq!(b.status(), CircuitStatus::HalfOpen);

        // Second concurrent call while the trial is in flight is rejected.
        assert!(matches!(
            b.acquire(),
            Err(TripwireError::DependencyUnavailable { .. })
        ));
        trial.succeed();
    }

    #[tokio::test]
    async fn dropped_trial_permit_frees_the_slot() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);
        for _ in 0..5 {
            let _ = fail_once(&b).await;
        }
        clock.advance(Duration::from_secs(60));

        let trial = b.acquire().unwrap();
        drop(trial);

        assert_eq!(b.status(), CircuitStatus::HalfOpen);
        assert!(b.acquire().is_ok());
    }

    #[tokio::test]
    async fn check_gates_only_while_open_and_takes_no_slot() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);
        b.check().unwrap();
        for _ in 0..5 {
            let _ = fail_once(&b).await;
        }

        clock.advance(Duration::from_secs(45));
        match b.check() {
            Err(TripwireError::DependencyUnavailable { retry_after_secs, .. }) => {
                assert_eq!(retry_after_secs, 15);
            }
            other => panic!("expected DependencyUnavailable, got {other:?}"),
        }

        clock.advance(Duration::from_secs(15));
        b.check().unwrap();
        b.check().unwrap();
        // Checking neither moves to half-open nor uses the trial slot.
        assert_eq!(b.status(), CircuitStatus::Open);
        let trial = b.acquire().unwrap();
        assert!(trial.is_trial());
        trial.succeed();
    }

    #[test]
    fn registry_check_passes_unknown_dependencies_without_registering() {
        let registry = BreakerRegistry::with_settings(BreakerSettings::default());
        registry.check("never-called").unwrap();
        assert!(registry.is_empty());
    }

    // ── 3. half-open → open / closed ──────────────────────────────────────────

    #[tokio::test]
    async fn failing_trial_reopens_and_resets_opened_at() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);
        for _ in 0..5 {
            let _ = fail_once(&b).await;
        }
        let first_opened = b.state().opened_at.unwrap();

        clock.advance(Duration::from_secs(60));
        let _ = fail_once(&b).await;

        let state = b.state();
        assert_eq!(state.status, CircuitStatus::Open);
        assert!(state.opened_at.unwrap() > first_opened);
        assert_eq!(state.retry_after_secs, 60);
    }

    #[tokio::test]
    async fn closes_after_success_threshold_and_resets_counters() {
        let clock = Arc::new(ManualClock::starting_now());
        let b = breaker(&clock);
        for _ in 0..5 {
            let _ = fail_once(&b).await;
        }
        clock.advance(Duration::from_secs(60));

        succeed_once(&b).await.unwrap();
        assert_eq!(b.status(), CircuitStatus::HalfOpen);
        assert_eq!(b.state().consecutive_successes, 1);

        succeed_once(&b).await.unwrap();
        let state = b.state();
        assert_eq!(state.status, CircuitStatus::Closed);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.consecutive_successes, 0);
    }

    /// A dependency that fails 5 times then recovers: Open from failure 5
    /// until the timeout, HalfOpen on the first call after it, Closed after
    /// 2 successes.
    #[tokio::test]
    async fn flaky_dependency_walks_the_full_cycle() {
        let clock = Arc::new(ManualClock::starting_now());
        let metrics = Arc::new(RecordingMetrics::default());
        let registry = BreakerRegistry::new(
            BreakerSettings::default(),
            clock.clone(),
            metrics.clone(),
        );
        let calls = Arc::new(Mutex::new(0u32));

        for _ in 0..5 {
            assert!(flaky_call(&registry, calls.clone()).await.is_err());
        }
        assert_eq!(registry.state("payments").unwrap().status, CircuitStatus::Open);

        clock.advance(Duration::from_secs(30));
        assert!(matches!(
            flaky_call(&registry, calls.clone()).await,
            Err(TripwireError::DependencyUnavailable { .. })
        ));
        assert_eq!(*calls.lock().unwrap(), 5);

        clock.advance(Duration::from_secs(30));
        assert_eq!(flaky_call(&registry, calls.clone()).await.unwrap(), 6);
        assert_eq!(registry.state("payments").unwrap().status, CircuitStatus::HalfOpen);
        assert_eq!(flaky_call(&registry, calls.clone()).await.unwrap(), 7);
        assert_eq!(registry.state("payments").unwrap().status, CircuitStatus::Closed);

        let statuses: Vec<CircuitStatus> = metrics
            .transitions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(
            statuses,
            vec![
                CircuitStatus::Closed,
                CircuitStatus::Open,
                CircuitStatus::HalfOpen,
                CircuitStatus::Closed
            ]
        );
    }

    // ── 4. registry and configuration ─────────────────────────────────────────

    #[tokio::test]
    async fn breakers_are_isolated_per_dependency() {
        let clock = Arc::new(ManualClock::starting_now());
        let registry = BreakerRegistry::new(
            BreakerSettings::default(),
            clock.clone(),
            Arc::new(RecordingMetrics::default()),
        );
        for _ in 0..5 {
            let _ = registry
                .call("log-store", || async { Err::<(), _>(failure()) })
                .await;
        }
        registry
            .call("orchestrator", || async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(registry.open_dependencies(), vec!["log-store".to_string()]);
        let states = registry.states();
        assert_eq!(states.len(), 2);
        assert_eq!(states["orchestrator"].status, CircuitStatus::Closed);
        assert!(Arc::ptr_eq(
            &registry.breaker("log-store"),
            &registry.breaker("log-store")
        ));
    }

    #[test]
    fn settings_parse_profiles_and_overrides_from_toml() {
        let settings: BreakerSettings = toml::from_str(
            r#"
            failure_threshold = 4

            [dependencies.orchestrator]
            profile = "critical"

            [dependencies.metrics-backend]
            profile = "high-volume"
            timeout_secs = 15
            "#,
        )
        .unwrap();
        settings.validate().unwrap();

        let default = settings.for_dependency("notifier");
        assert_eq!(default.failure_threshold, 4);
        assert_eq!(default.success_threshold, 2);
        assert_eq!(default.timeout_secs, 60);

        let critical = settings.for_dependency("orchestrator");
        assert_eq!(critical.failure_threshold, 3);
        assert_eq!(critical.timeout_secs, 120);

        let high_volume = settings.for_dependency("metrics-backend");
        assert_eq!(high_volume.failure_threshold, 10);
        assert_eq!(high_volume.timeout_secs, 15);
    }

    #[test]
    fn zero_threshold_is_a_config_error() {
        let mut settings = BreakerSettings::default();
        settings.dependencies.insert(
            "orchestrator".to_string(),
            DependencyOverride {
                failure_threshold: Some(0),
                ..DependencyOverride::default()
            },
        );
        let err = settings.validate().unwrap_err();
        assert_eq!(err.code(), "config_error");
        assert!(err.to_string().contains("orchestrator"));
    }
}
