//! # tripwire-supervisor
//!
//! The self-heal supervisor and composition root of the tripwire agent
//! guard.
//!
//! This crate provides:
//! - [`Supervisor`], which runs every agent action through fingerprinting,
//!   admission, idempotency, approval, loop detection, and the dependency's
//!   circuit breaker, and halts workflows that loop
//! - The health monitor and self-heal loop, with built-in probes and
//!   remediations
//! - [`TripwireConfig`], the TOML configuration for every component
//! - [`PrometheusMetrics`], a `MetricsSink` backed by a Prometheus registry
//! - Reference scenarios used by the demo binary
//!
//! ## Usage
//!
//! ```rust,ignore
//! let supervisor = Supervisor::builder(TripwireConfig::default(), executor)
//!     .escalation(pager)
//!     .build()
//!     .await?;
//! let outcome = supervisor
//!     .submit_action(&workflow, ActionKind::Restart, "checkout-7f9c", json!({}))
//!     .await?;
//! ```

pub mod config;
pub mod escalation;
pub mod health;
pub mod metrics;
pub mod scenarios;
pub mod supervisor;

pub use config::{SupervisorConfig, TripwireConfig};
pub use escalation::LogEscalation;
pub use health::{
    ConnectivityProbe, FnRemediation, HealthMonitor, LatencyProbe, LatencyTracker,
    PurgeExpiredRecords, ThresholdProbe,
};
pub use metrics::{MetricsError, PrometheusMetrics};
pub use supervisor::{Supervisor, SupervisorBuilder};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    use tripwire_contracts::{
        action::{ActionKind, ActionRequest, AgentId, ExecutionReport, WorkflowId},
        circuit::CircuitStatus,
        error::{TripwireError, TripwireResult},
        execution::ActionOutcome,
        health::HealthStatus,
        signal::LoopReason,
    };
    use tripwire_core::{
        clock::{Clock, ManualClock},
        traits::{ActionExecutor, EscalationChannel, HealthProbe, Remediation},
    };
    use tripwire_store::MemoryStore;

    use super::*;
    use crate::scenarios::{RecordingEscalation, SimulatedExecutor};

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn converging(
    ) -> Arc<SimulatedExecutor<impl Fn(&ActionRequest, usize) -> TripwireResult<ExecutionReport> + Send + Sync + 'static>>
    {
        Arc::new(SimulatedExecutor::new(|request: &ActionRequest, _| {
            Ok(ExecutionReport::converged(format!("{} done", request.target)))
        }))
    }

    struct Harness {
        supervisor: Supervisor,
        escalation: RecordingEscalation,
        clock: Arc<ManualClock>,
    }

    async fn harness(config: TripwireConfig, executor: Arc<dyn ActionExecutor>) -> Harness {
        harness_with_store(config, executor, Arc::new(MemoryStore::new())).await
    }

    async fn harness_with_store(
        config: TripwireConfig,
        executor: Arc<dyn ActionExecutor>,
        store: Arc<MemoryStore>,
    ) -> Harness {
        let escalation = RecordingEscalation::new();
        let clock = Arc::new(ManualClock::starting_now());
        let clock_handle: Arc<dyn Clock> = clock.clone();
        let escalation_handle: Arc<dyn EscalationChannel> = Arc::new(escalation.clone());
        let supervisor = Supervisor::builder(config, executor)
            .escalation(escalation_handle)
            .clock(clock_handle)
            .store(store)
            .build()
            .await
            .unwrap();
        Harness {
            supervisor,
            escalation,
            clock,
        }
    }

    fn wf(id: &str) -> WorkflowId {
        WorkflowId::new(id)
    }

    /// Converges, except for targets starting with `down`, which fail.
    fn failing_for_down_targets(
    ) -> Arc<SimulatedExecutor<impl Fn(&ActionRequest, usize) -> TripwireResult<ExecutionReport> + Send + Sync + 'static>>
    {
        Arc::new(SimulatedExecutor::new(|request: &ActionRequest, _| {
            if request.target.starts_with("down") {
                Err(TripwireError::ActionFailed {
                    action: format!("{}:{}", request.kind, request.target),
                    reason: "connection refused".to_string(),
                })
            } else {
                Ok(ExecutionReport::converged(format!("{} done", request.target)))
            }
        }))
    }

    /// Open the orchestrator breaker (threshold 2) from a throwaway workflow.
    async fn trip_orchestrator(h: &Harness) {
        for n in 0..2 {
            let err = h
                .supervisor
                .submit_action(&wf("trip"), ActionKind::CheckStatus, format!("down-{n}"), json!({}))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "action_failed");
        }
        assert_eq!(
            h.supervisor.get_circuit_states()["orchestrator"].status,
            CircuitStatus::Open
        );
    }

    /// Blocks inside `execute` until released.
    struct GatedExecutor {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ActionExecutor for GatedExecutor {
        async fn execute(&self, _request: &ActionRequest) -> TripwireResult<ExecutionReport> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(ExecutionReport::converged("released"))
        }
    }

    struct SlowExecutor(Duration);

    #[async_trait]
    impl ActionExecutor for SlowExecutor {
        async fn execute(&self, _request: &ActionRequest) -> TripwireResult<ExecutionReport> {
            tokio::time::sleep(self.0).await;
            Ok(ExecutionReport::converged("too late"))
        }
    }

    // ── 1. Idempotency ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn same_action_executes_once_and_replays_its_result() {
        let executor = converging();
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("scale-web");

        let mut summaries = Vec::new();
        for n in 0..5 {
            let outcome = h
                .supervisor
                .submit_action(
                    &workflow,
                    ActionKind::Scale,
                    "web",
                    json!({ "replicas": 3, "request_id": format!("req-{n}") }),
                )
                .await
                .unwrap();
            if n == 0 {
                assert!(matches!(outcome, ActionOutcome::Executed { step_index: Some(0), .. }));
            } else {
                assert!(matches!(outcome, ActionOutcome::AlreadyCompleted { .. }));
            }
            summaries.push(outcome.result_summary().unwrap_or_default().to_string());
        }

        assert_eq!(executor.calls(), 1);
        assert!(summaries.iter().all(|s| s == "web done"));
        // Replays are not iterations and leave no loop history.
        let stats = h.supervisor.workflow_stats(&workflow).unwrap();
        assert_eq!(stats.total_iterations, 1);
        assert_eq!(stats.history_len, 1);
    }

    #[tokio::test]
    async fn completed_action_replays_across_workflows() {
        let executor = converging();
        let h = harness(TripwireConfig::default(), executor.clone()).await;

        h.supervisor
            .submit_action(&wf("a"), ActionKind::ClearCache, "cdn", json!({}))
            .await
            .unwrap();
        let outcome = h
            .supervisor
            .submit_action(&wf("b"), ActionKind::ClearCache, "  CDN ", json!(null))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::AlreadyCompleted { .. }));
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test]
    async fn attempt_numbers_are_assigned_per_fingerprint() {
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Ok(ExecutionReport::unresolved("still degraded"))
        }));
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("attempts");

        for _ in 0..2 {
            h.supervisor
                .submit_action(&workflow, ActionKind::FetchLogs, "api", json!({}))
                .await
                .unwrap();
        }
        let attempts: Vec<u32> = executor.requests().iter().map(|r| r.attempt_number).collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    // ── 2. Loop halts ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn repeated_unresolved_action_halts_and_escalates() {
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Ok(ExecutionReport::unresolved("pod still crashing"))
        }));
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("crash");

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                h.supervisor
                    .submit_action(&workflow, ActionKind::Restart, "x", json!({}))
                    .await,
            );
        }
        let err = last.unwrap().unwrap_err();
        assert_eq!(err.code(), "loop.repetition");
        assert!(err.to_string().contains("restart:x repeated 3 times without state change"));
        assert_eq!(executor.calls(), 3);

        let again = h
            .supervisor
            .submit_action(&workflow, ActionKind::Restart, "x", json!({}))
            .await;
        assert!(matches!(
            again,
            Err(TripwireError::WorkflowHalted { ref code, .. }) if code == "loop.repetition"
        ));
        assert_eq!(executor.calls(), 3);

        let report = h.supervisor.workflow_report(&workflow).unwrap();
        assert_eq!(report.threshold.name, "max_action_repetitions");
        assert_eq!(report.recent_history.len(), 3);
        assert_eq!(h.escalation.codes(), vec!["loop.repetition"]);

        // Other workflows are unaffected.
        assert!(h
            .supervisor
            .submit_action(&wf("other"), ActionKind::FetchLogs, "x", json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn returning_to_an_earlier_state_halts() {
        let executor = Arc::new(SimulatedExecutor::new(|request: &ActionRequest, _| {
            let replicas = request.parameters["replicas"].clone();
            Ok(ExecutionReport::unresolved("latency unchanged")
                .with_state(json!({ "replicas": replicas })))
        }));
        let h = harness(TripwireConfig::default(), executor).await;
        let workflow = wf("flap");

        for replicas in [2, 3] {
            h.supervisor
                .submit_action(&workflow, ActionKind::Scale, "web", json!({ "replicas": replicas }))
                .await
                .unwrap();
        }
        let err = h
            .supervisor
            .submit_action(&workflow, ActionKind::Scale, "web", json!({ "replicas": 2 }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "loop.state_revisit");
    }

    #[tokio::test]
    async fn distinct_actions_still_hit_the_iteration_budget() {
        let mut config = TripwireConfig::default();
        config.loop_detector.max_iterations = 4;
        let executor = converging();
        let h = harness(config, executor.clone()).await;
        let workflow = wf("busy-agent");

        for n in 0..4 {
            h.supervisor
                .submit_action(&workflow, ActionKind::CheckStatus, format!("svc-{n}"), json!({}))
                .await
                .unwrap();
        }
        let err = h
            .supervisor
            .submit_action(&workflow, ActionKind::CheckStatus, "svc-4", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "loop.iteration_budget");
        assert_eq!(executor.calls(), 4);
        let report = err.halt_report().unwrap();
        assert_eq!(report.threshold.limit, 4);
        assert_eq!(report.threshold.observed, 5);
    }

    #[tokio::test]
    async fn circular_delegation_halts_the_workflow() {
        let h = harness(TripwireConfig::default(), converging()).await;
        let workflow = wf("incident");
        let mut stack = h.supervisor.new_call_stack();

        for agent in ["triage", "diagnose", "remediate"] {
            h.supervisor
                .enter_delegate(&workflow, &mut stack, AgentId::new(agent))
                .await
                .unwrap();
        }
        let err = h
            .supervisor
            .enter_delegate(&workflow, &mut stack, AgentId::new("triage"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "loop.circular_delegation");
        assert_eq!(stack.depth(), 3);
        assert_eq!(h.supervisor.exit_delegate(&mut stack), Some(AgentId::new("remediate")));

        let refused = h
            .supervisor
            .submit_action(&workflow, ActionKind::Notify, "on-call", json!({}))
            .await;
        assert!(matches!(refused, Err(TripwireError::WorkflowHalted { .. })));
        assert_eq!(h.escalation.codes(), vec!["loop.circular_delegation"]);
    }

    // ── 3. Circuit breaker ────────────────────────────────────────────────────

    #[tokio::test]
    async fn open_breaker_rejects_without_executing_or_counting() {
        let mut config = TripwireConfig::default();
        config.breaker.defaults.failure_threshold = 2;
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Err(TripwireError::ActionFailed {
                action: "check_status:api".to_string(),
                reason: "connection refused".to_string(),
            })
        }));
        let h = harness(config, executor.clone()).await;
        let workflow = wf("status-checks");

        for n in 0..2 {
            let err = h
                .supervisor
                .submit_action(&workflow, ActionKind::CheckStatus, format!("api-{n}"), json!({}))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "action_failed");
        }
        let err = h
            .supervisor
            .submit_action(&workflow, ActionKind::CheckStatus, "api-2", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TripwireError::DependencyUnavailable { ref dependency, .. } if dependency == "orchestrator"));
        assert!(err.is_transient());
        assert_eq!(executor.calls(), 2);

        let states = h.supervisor.get_circuit_states();
        assert_eq!(states["orchestrator"].status, CircuitStatus::Open);
        assert_eq!(h.supervisor.workflow_stats(&workflow).unwrap().history_len, 2);
        assert!(h.supervisor.workflow_report(&workflow).is_none());

        h.clock.advance(Duration::from_secs(60));
        assert_eq!(
            h.supervisor
                .submit_action(&workflow, ActionKind::CheckStatus, "api-3", json!({}))
                .await
                .unwrap_err()
                .code(),
            "action_failed"
        );
        assert_eq!(executor.calls(), 3, "one trial call after the timeout");
    }

    #[tokio::test]
    async fn completed_action_is_not_replayed_while_its_breaker_is_open() {
        let mut config = TripwireConfig::default();
        config.breaker.defaults.failure_threshold = 2;
        let executor = failing_for_down_targets();
        let h = harness(config, executor.clone()).await;

        h.supervisor
            .submit_action(&wf("w0"), ActionKind::CheckStatus, "done", json!({}))
            .await
            .unwrap();
        trip_orchestrator(&h).await;

        let err = h
            .supervisor
            .submit_action(&wf("w1"), ActionKind::CheckStatus, "done", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "dependency_unavailable");
        assert_eq!(executor.calls(), 3);

        // Past the timeout the gate passes; the replay takes no trial slot.
        h.clock.advance(Duration::from_secs(60));
        let outcome = h
            .supervisor
            .submit_action(&wf("w1"), ActionKind::CheckStatus, "done", json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::AlreadyCompleted { .. }));
        assert_eq!(executor.calls(), 3);
        assert_eq!(
            h.supervisor.get_circuit_states()["orchestrator"].status,
            CircuitStatus::Open
        );
    }

    #[tokio::test]
    async fn breaker_rejections_do_not_spend_the_iteration_budget() {
        let mut config = TripwireConfig::default();
        config.breaker.defaults.failure_threshold = 2;
        config.loop_detector.max_iterations = 3;
        let executor = failing_for_down_targets();
        let h = harness(config, executor.clone()).await;
        trip_orchestrator(&h).await;

        let workflow = wf("retrying");
        for _ in 0..10 {
            let err = h
                .supervisor
                .submit_action(&workflow, ActionKind::Restart, "api", json!({}))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "dependency_unavailable");
        }
        assert_eq!(executor.calls(), 2);
        assert_eq!(h.supervisor.workflow_stats(&workflow).unwrap().total_iterations, 0);
        assert!(h.supervisor.workflow_report(&workflow).is_none());
        assert!(h.escalation.codes().is_empty());

        h.clock.advance(Duration::from_secs(60));
        let outcome = h
            .supervisor
            .submit_action(&workflow, ActionKind::Restart, "api", json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { converged: true, .. }));
        assert_eq!(executor.calls(), 3);
        assert_eq!(h.supervisor.workflow_stats(&workflow).unwrap().total_iterations, 1);
    }

    #[tokio::test]
    async fn repeated_failures_of_one_action_halt() {
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Err(TripwireError::ActionFailed {
                action: "rollback:checkout".to_string(),
                reason: "revision not found".to_string(),
            })
        }));
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("bad-rollback");

        let mut last = None;
        for _ in 0..3 {
            last = Some(
                h.supervisor
                    .submit_action(&workflow, ActionKind::Rollback, "checkout", json!({ "revision": 40 }))
                    .await,
            );
        }
        assert_eq!(last.unwrap().unwrap_err().code(), "loop.repetition");
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn slow_executor_times_out_and_counts_as_failure() {
        let mut config = TripwireConfig::default();
        config.supervisor.action_timeout_ms = 20;
        let h = harness(config, Arc::new(SlowExecutor(Duration::from_millis(500)))).await;

        let err = h
            .supervisor
            .submit_action(&wf("slow"), ActionKind::CheckStatus, "db", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, TripwireError::ActionTimedOut { timeout_ms: 20, .. }));
        assert_eq!(
            h.supervisor.get_circuit_states()["orchestrator"].consecutive_failures,
            1
        );
    }

    // ── 4. Admission ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_cap_rejects_until_rollover() {
        let mut config = TripwireConfig::default();
        config.governor.max_requests_per_window = 2;
        let executor = converging();
        let h = harness(config, executor.clone()).await;

        for n in 0..2 {
            h.supervisor
                .submit_action(&wf(&format!("w{n}")), ActionKind::CheckStatus, format!("s{n}"), json!({}))
                .await
                .unwrap();
        }
        let err = h
            .supervisor
            .submit_action(&wf("w2"), ActionKind::CheckStatus, "s2", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "budget_exceeded");
        assert_eq!(executor.calls(), 2);

        h.clock.advance(Duration::from_secs(60));
        assert!(h
            .supervisor
            .submit_action(&wf("w2"), ActionKind::CheckStatus, "s2", json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn reported_cost_replaces_the_estimate() {
        let mut config = TripwireConfig::default();
        config.governor.kind_costs.insert("query_metrics".to_string(), 4.0);
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Ok(ExecutionReport::converged("p99 412ms").with_cost(1.0))
        }));
        let h = harness(config, executor.clone()).await;

        // Charged at the estimate, the third query would overshoot the cap.
        for n in 0..3 {
            h.supervisor
                .submit_action(&wf(&format!("q{n}")), ActionKind::QueryMetrics, format!("svc-{n}"), json!({}))
                .await
                .unwrap();
        }
        let budget = h.supervisor.budget();
        assert!((budget.cumulative_cost - 3.0).abs() < 1e-9, "cost {}", budget.cumulative_cost);
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_executor() {
        let executor = converging();
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("invalid");

        let cases = [
            (ActionKind::Restart, "   ", json!({}), "malformed_action"),
            (ActionKind::Restart, "web", json!([1, 2]), "malformed_action"),
            (ActionKind::Scale, "web", json!({ "replicas": "+2" }), "malformed_action"),
            (ActionKind::parse("rm_rf"), "/", json!({}), "unauthorized_action"),
        ];
        for (kind, target, parameters, code) in cases {
            let err = h
                .supervisor
                .submit_action(&workflow, kind, target, parameters)
                .await
                .unwrap_err();
            assert_eq!(err.code(), code);
            assert!(!err.is_transient());
        }
        assert_eq!(executor.calls(), 0);
        assert_eq!(h.supervisor.budget().request_count, 0);
    }

    // ── 5. Approval ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn approval_gated_action_waits_for_a_grant() {
        let mut config = TripwireConfig::default();
        config.governor.approval_required = vec!["rollback".to_string()];
        let executor = converging();
        let h = harness(config, executor.clone()).await;
        let workflow = wf("rollback-checkout");
        let submit = || {
            h.supervisor
                .submit_action(&workflow, ActionKind::Rollback, "checkout", json!({ "revision": 41 }))
        };

        let first = submit().await.unwrap();
        let ActionOutcome::AwaitingApproval { fingerprint, reason } = first.clone() else {
            panic!("expected AwaitingApproval, got {first:?}");
        };
        assert!(reason.contains("rollback"));
        assert!(matches!(submit().await.unwrap(), ActionOutcome::AwaitingApproval { .. }));
        assert_eq!(executor.calls(), 0);
        assert_eq!(h.escalation.codes(), vec!["escalate.approval_required"]);

        assert!(h.supervisor.grant_approval(&workflow, &fingerprint));
        assert!(matches!(submit().await.unwrap(), ActionOutcome::Executed { converged: true, .. }));
        assert!(matches!(submit().await.unwrap(), ActionOutcome::AlreadyCompleted { .. }));
        assert_eq!(executor.calls(), 1);
    }

    // ── 6. Checkpoints and workflow lifecycle ─────────────────────────────────

    #[tokio::test]
    async fn restarted_workflow_resumes_after_its_last_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        let workflow = wf("deploy-7");
        let steps = [
            (ActionKind::Scale, "web", json!({ "replicas": 4 })),
            (ActionKind::SetResourceLimits, "web", json!({ "memory": "512Mi" })),
        ];

        let first_run = converging();
        {
            let h = harness_with_store(TripwireConfig::default(), first_run.clone(), store.clone()).await;
            assert_eq!(h.supervisor.start_workflow(&workflow).await.unwrap().next_step, 0);
            for (n, (kind, target, parameters)) in steps.iter().enumerate() {
                let outcome = h
                    .supervisor
                    .submit_action(&workflow, kind.clone(), *target, parameters.clone())
                    .await
                    .unwrap();
                assert!(matches!(outcome, ActionOutcome::Executed { step_index: Some(i), .. } if i == n as u64));
            }
        }
        assert_eq!(first_run.calls(), 2);
        assert_eq!(store.completion_count(), 2);

        // A fresh supervisor over the same store, as after a crash.
        let second_run = converging();
        let h = harness_with_store(TripwireConfig::default(), second_run.clone(), store.clone()).await;
        let resume = h.supervisor.start_workflow(&workflow).await.unwrap();
        assert_eq!(resume.next_step, 2);
        assert_eq!(resume.checkpoint.as_ref().map(|c| c.step_index), Some(1));

        for (kind, target, parameters) in steps.iter() {
            let outcome = h
                .supervisor
                .submit_action(&workflow, kind.clone(), *target, parameters.clone())
                .await
                .unwrap();
            assert!(matches!(outcome, ActionOutcome::AlreadyCompleted { .. }));
        }
        assert_eq!(second_run.calls(), 0);
        assert_eq!(store.completion_count(), 2);

        let outcome = h
            .supervisor
            .submit_action(&workflow, ActionKind::ClearCache, "cdn", json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { step_index: Some(2), .. }));

        h.supervisor.complete_workflow(&workflow).await.unwrap();
        assert_eq!(h.supervisor.start_workflow(&workflow).await.unwrap().next_step, 0);
    }

    #[tokio::test]
    async fn file_store_under_data_dir_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TripwireConfig::default();
        config.store.data_dir = Some(dir.path().to_path_buf());
        let workflow = wf("durable");

        let first: Arc<dyn ActionExecutor> = converging();
        let supervisor = Supervisor::builder(config.clone(), first).build().await.unwrap();
        supervisor
            .submit_action(&workflow, ActionKind::Restart, "worker", json!({}))
            .await
            .unwrap();
        drop(supervisor);

        let second = converging();
        let handle: Arc<dyn ActionExecutor> = second.clone();
        let supervisor = Supervisor::builder(config, handle).build().await.unwrap();
        assert_eq!(supervisor.start_workflow(&workflow).await.unwrap().next_step, 1);
        let outcome = supervisor
            .submit_action(&workflow, ActionKind::Restart, "worker", json!({}))
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::AlreadyCompleted { .. }));
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_workflow_refuses_new_actions() {
        let executor = converging();
        let h = harness(TripwireConfig::default(), executor.clone()).await;
        let workflow = wf("cancel-me");
        h.supervisor.start_workflow(&workflow).await.unwrap();
        let token = h.supervisor.cancellation_token(&workflow).unwrap();

        assert!(h.supervisor.cancel_workflow(&workflow));
        assert!(token.is_cancelled());
        let err = h
            .supervisor
            .submit_action(&workflow, ActionKind::FetchLogs, "api", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "workflow_cancelled");
        assert_eq!(executor.calls(), 0);

        h.supervisor.complete_workflow(&workflow).await.unwrap();
        assert_eq!(h.supervisor.workflow_count(), 0);
    }

    #[tokio::test]
    async fn unknown_workflows_leave_no_runtime_state() {
        let executor = Arc::new(SimulatedExecutor::new(|_, _| {
            Ok(ExecutionReport::unresolved("still crashing"))
        }));
        let h = harness(TripwireConfig::default(), executor).await;
        let ghost = wf("never-started");
        let request = ActionRequest::new(ghost.clone(), ActionKind::Rollback, "checkout", json!({}));
        let fingerprint = tripwire_core::Fingerprinter::default()
            .fingerprint(&request)
            .unwrap();

        assert!(!h.supervisor.cancel_workflow(&ghost));
        assert!(h.supervisor.cancellation_token(&ghost).is_none());
        assert!(!h.supervisor.grant_approval(&ghost, &fingerprint));
        assert!(h.supervisor.workflow_report(&ghost).is_none());
        assert!(h.supervisor.workflow_stats(&ghost).is_none());
        assert_eq!(h.supervisor.workflow_count(), 0);

        // A halted workflow keeps its runtime until it is closed out.
        let looping = wf("looping");
        for _ in 0..3 {
            let _ = h
                .supervisor
                .submit_action(&looping, ActionKind::Restart, "checkout", json!({}))
                .await;
        }
        assert!(h.supervisor.workflow_report(&looping).is_some());
        assert_eq!(h.supervisor.workflow_count(), 1);
        h.supervisor.complete_workflow(&looping).await.unwrap();
        assert_eq!(h.supervisor.workflow_count(), 0);
        assert!(h.supervisor.workflow_report(&looping).is_none());
    }

    #[tokio::test]
    async fn concurrent_submission_to_one_workflow_is_busy() {
        let executor = Arc::new(GatedExecutor {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let handle: Arc<dyn ActionExecutor> = executor.clone();
        let supervisor = Arc::new(
            Supervisor::builder(TripwireConfig::default(), handle)
                .build()
                .await
                .unwrap(),
        );
        let workflow = wf("serial");

        let background = {
            let supervisor = Arc::clone(&supervisor);
            let workflow = workflow.clone();
            tokio::spawn(async move {
                supervisor
                    .submit_action(&workflow, ActionKind::Restart, "api", json!({}))
                    .await
            })
        };
        executor.entered.notified().await;

        let err = supervisor
            .submit_action(&workflow, ActionKind::FetchLogs, "api", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "workflow_busy");
        assert!(matches!(
            supervisor.complete_workflow(&workflow).await,
            Err(TripwireError::WorkflowBusy { .. })
        ));

        executor.release.notify_one();
        assert!(background.await.unwrap().is_ok());
        // The in-flight flag is cleared once the first submission returns.
        assert!(supervisor
            .submit_action(&workflow, ActionKind::Restart, "api", json!({}))
            .await
            .is_ok());
    }

    // ── 7. Self-heal ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn exhausted_self_heal_suspends_autonomy_until_resumed() {
        let mut config = TripwireConfig::default();
        config.supervisor.max_self_heal_failures = 2;

        let overloaded = Arc::new(AtomicBool::new(true));
        let remediations = Arc::new(AtomicU32::new(0));
        let reading = Arc::clone(&overloaded);
        let counter = Arc::clone(&remediations);
        let probe: Arc<dyn HealthProbe> = Arc::new(ThresholdProbe::new("queue_depth", 100.0, move || {
            if reading.load(Ordering::SeqCst) { 5_000.0 } else { 10.0 }
        }));
        let remediation: Arc<dyn Remediation> = Arc::new(FnRemediation::new("drain_queue", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let escalation = RecordingEscalation::new();
        let escalation_handle: Arc<dyn EscalationChannel> = Arc::new(escalation.clone());
        let executor = converging();
        let handle: Arc<dyn ActionExecutor> = executor.clone();
        let supervisor = Supervisor::builder(config, handle)
            .escalation(escalation_handle)
            .probe(probe)
            .remediation(remediation)
            .build()
            .await
            .unwrap();

        let first = supervisor.health_tick().await.unwrap();
        assert_eq!(first.status, HealthStatus::Unhealthy);
        assert_eq!(first.failed_checks, vec!["queue_depth".to_string()]);
        assert_eq!(remediations.load(Ordering::SeqCst), 1);

        let err = supervisor.health_tick().await.unwrap_err();
        assert_eq!(err.code(), "escalate.self_heal_exhausted");
        assert!(supervisor.is_suspended());
        assert_eq!(escalation.codes(), vec!["escalate.self_heal_exhausted"]);

        let refused = supervisor
            .submit_action(&wf("during-outage"), ActionKind::CheckStatus, "api", json!({}))
            .await;
        assert!(matches!(refused, Err(TripwireError::EscalateToHuman(_))));
        assert_eq!(executor.calls(), 0);

        // Still unhealthy, but the suspension is only escalated once.
        assert!(supervisor.health_tick().await.is_ok());
        assert_eq!(escalation.codes().len(), 1);

        overloaded.store(false, Ordering::SeqCst);
        assert!(supervisor.resume_autonomy());
        assert!(!supervisor.resume_autonomy());
        assert_eq!(supervisor.health_tick().await.unwrap().status, HealthStatus::Healthy);
        assert!(supervisor
            .submit_action(&wf("after-outage"), ActionKind::CheckStatus, "api", json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn health_loop_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let probe: Arc<dyn HealthProbe> = Arc::new(ThresholdProbe::new("cpu", 1.0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            0.5
        }));
        let executor: Arc<dyn ActionExecutor> = converging();
        let supervisor = Arc::new(
            Supervisor::builder(TripwireConfig::default(), executor)
                .probe(probe)
                .build()
                .await
                .unwrap(),
        );

        let shutdown = CancellationToken::new();
        let handle = supervisor.spawn_health_loop(shutdown.clone());
        // The first interval tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert_eq!(supervisor.get_health().status, HealthStatus::Healthy);
        assert_eq!(supervisor.get_health().checks.len(), 3);
    }

    // ── 8. Configuration ──────────────────────────────────────────────────────

    #[test]
    fn toml_config_overrides_only_what_it_names() {
        let config = TripwireConfig::from_toml_str(
            r#"
            [breaker]
            failure_threshold = 3

            [loop]
            max_action_repetitions = 4

            [governor]
            approval_required = ["rollback"]

            [supervisor]
            action_timeout_ms = 5000
            "#,
        )
        .unwrap();

        assert_eq!(config.breaker.defaults.failure_threshold, 3);
        assert_eq!(config.breaker.defaults.success_threshold, 2);
        assert_eq!(config.loop_detector.max_action_repetitions, 4);
        assert_eq!(config.loop_detector.max_iterations, 20);
        assert_eq!(config.governor.approval_required, vec!["rollback".to_string()]);
        assert_eq!(config.supervisor.action_timeout_ms, 5000);
        assert_eq!(config.supervisor.max_self_heal_failures, 5);
        assert_eq!(config.store.idempotency_ttl_secs, 86_400);
    }

    #[test]
    fn invalid_config_is_a_config_error() {
        for toml in [
            "[breaker]\nfailure_threshold = 0",
            "[supervisor]\nmax_self_heal_failures = 0",
            "[store]\nidempotency_ttl_secs = 0",
            "[loop]\nmax_iterations = \"many\"",
            "not toml at all [",
        ] {
            let err = TripwireConfig::from_toml_str(toml).unwrap_err();
            assert_eq!(err.code(), "config_error", "accepted: {toml}");
        }
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let err = TripwireConfig::from_file(std::path::Path::new("/nonexistent/tripwire.toml"))
            .unwrap_err();
        assert!(matches!(err, TripwireError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn unknown_governor_kind_fails_the_build() {
        let mut config = TripwireConfig::default();
        config.governor.allowed_actions.push("launch_missiles".to_string());
        let executor: Arc<dyn ActionExecutor> = converging();
        let err = Supervisor::builder(config, executor).build().await.unwrap_err();
        assert_eq!(err.code(), "config_error");
    }

    #[test]
    fn loop_reason_codes_match_halt_threshold_names() {
        assert_eq!(LoopReason::Repetition.threshold_name(), "max_action_repetitions");
        assert_eq!(LoopReason::IterationBudget.threshold_name(), "max_iterations");
    }
}
