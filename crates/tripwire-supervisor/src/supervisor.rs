//! The supervisor: composition root of the guard and owner of the self-heal
//! loop.
//!
//! Every action goes through `submit_action`, which runs:
//!
//!   1. gates: autonomy suspended, workflow halted, cancelled, or busy
//!   2. fingerprint the request
//!   3. governor: validate the request, then charge it against the budgets
//!   4. breaker gate: an open breaker rejects before anything else runs
//!   5. idempotency: a completed fingerprint replays its cached result
//!   6. approval: approval-gated kinds wait for `grant_approval`
//!   7. breaker permit
//!   8. loop detector: per-workflow iteration budget
//!   9. the executor call under a timeout
//!  10. on convergence, the idempotency record and then the checkpoint
//!  11. loop detector: record, then repetition and state-revisit checks
//!
//! Any loop signal halts the workflow and escalates with a `HaltReport`.
//! Halts are terminal: the workflow accepts no further actions until
//! `complete_workflow` closes it out.
//!
//! Invariant: `execute()` is never called for a request that failed steps
//! 1 through 8. Replays from step 5 take no breaker permit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tripwire_breaker::BreakerRegistry;
use tripwire_contracts::{
    action::{ActionKind, ActionRequest, AgentId, ExecutionReport, WorkflowId},
    circuit::CircuitState,
    error::{TripwireError, TripwireResult},
    execution::{ActionOutcome, HistoryOutcome, WorkflowResume},
    health::{HealthSnapshot, HealthStatus},
    identity::{Fingerprint, StateFingerprint},
    signal::{HaltCause, HaltReport, LoopSignal, Threshold},
};
use tripwire_core::{
    clock::{Clock, SystemClock},
    traits::{
        ActionExecutor, CheckpointStore, EscalationChannel, HealthProbe, IdempotencyStore,
        MetricsSink, NoopMetrics, Remediation,
    },
    Fingerprinter,
};
use tripwire_governor::{ActionClass, BudgetSnapshot, Governor};
use tripwire_loop::{CallStack, LoopDetector, LoopDetectorConfig, LoopStats};
use tripwire_store::{CheckpointManager, FileStore, IdempotencyGuard, MemoryStore};

use crate::{
    config::TripwireConfig,
    escalation::LogEscalation,
    health::{ConnectivityProbe, HealthMonitor, LatencyProbe, LatencyTracker, PurgeExpiredRecords},
};

// ── Per-workflow state ────────────────────────────────────────────────────────

struct WorkflowRuntime {
    detector: LoopDetector,
    last_state: Option<StateFingerprint>,
    next_step: u64,
    /// Set once the checkpoint has been consulted for this runtime.
    resumed: bool,
    halted: Option<HaltReport>,
    cancel: CancellationToken,
    /// Digests granted approval and not yet consumed.
    approved: HashSet<String>,
    /// Digests already escalated for approval.
    pending_approval: HashSet<String>,
    /// Submissions seen per digest, for `attempt_number`.
    attempts: HashMap<String, u32>,
    in_flight: bool,
}

impl WorkflowRuntime {
    fn new(config: LoopDetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            detector: LoopDetector::new(config, clock),
            last_state: None,
            next_step: 0,
            resumed: false,
            halted: None,
            cancel: CancellationToken::new(),
            approved: HashSet::new(),
            pending_approval: HashSet::new(),
            attempts: HashMap::new(),
            in_flight: false,
        }
    }
}

type WorkflowTable = Mutex<HashMap<WorkflowId, WorkflowRuntime>>;

/// Clears a workflow's in-flight flag when the submission ends, however it
/// ends.
struct InFlight<'a> {
    workflows: &'a WorkflowTable,
    workflow_id: WorkflowId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut workflows = self.workflows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(runtime) = workflows.get_mut(&self.workflow_id) {
            runtime.in_flight = false;
        }
    }
}

// ── Supervisor ────────────────────────────────────────────────────────────────

pub struct Supervisor {
    config: TripwireConfig,
    executor: Arc<dyn ActionExecutor>,
    escalation: Arc<dyn EscalationChannel>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    fingerprinter: Fingerprinter,
    governor: Governor,
    breakers: Arc<BreakerRegistry>,
    idempotency: Arc<IdempotencyGuard>,
    checkpoints: CheckpointManager,
    health: HealthMonitor,
    latency: Arc<LatencyTracker>,
    workflows: WorkflowTable,
    /// Set when self-heal is exhausted; blocks every submission.
    suspension: Mutex<Option<HaltReport>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn builder(config: TripwireConfig, executor: Arc<dyn ActionExecutor>) -> SupervisorBuilder {
        SupervisorBuilder::new(config, executor)
    }

    pub fn config(&self) -> &TripwireConfig {
        &self.config
    }

    // ── Action pipeline ───────────────────────────────────────────────────────

    /// Submit one action for `workflow_id` and run it through the guard.
    ///
    /// # Errors
    ///
    /// Admission failures (`MalformedAction`, `InputTooLarge`,
    /// `SuspiciousInput`, `UnauthorizedAction`, `BudgetExceeded`) and
    /// `DependencyUnavailable` are returned before the executor runs.
    /// Executor failures come back as `ActionFailed` / `ActionTimedOut`.
    /// A loop signal returns `LoopDetected` and halts the workflow.
    pub async fn submit_action(
        &self,
        workflow_id: &WorkflowId,
        kind: ActionKind,
        target: impl Into<String>,
        parameters: serde_json::Value,
    ) -> TripwireResult<ActionOutcome> {
        self.submit(ActionRequest::new(workflow_id.clone(), kind, target, parameters))
            .await
    }

    /// Like [`submit_action`](Self::submit_action), for a request built by
    /// the caller (e.g. with request-specific volatile keys). The
    /// supervisor assigns `attempt_number`.
    pub async fn submit(&self, mut request: ActionRequest) -> TripwireResult<ActionOutcome> {
        let workflow_id = request.workflow_id.clone();

        // ── Step 1: Gates ────────────────────────────────────────────────────
        if let Some(report) = self.suspension() {
            warn!(workflow_id = %workflow_id, "autonomy suspended, action refused");
            return Err(TripwireError::EscalateToHuman(Box::new(report)));
        }
        let _in_flight = self.begin(&workflow_id)?;
        if !self.with_runtime(&workflow_id, |rt| rt.resumed) {
            self.restore(&workflow_id).await?;
        }

        // ── Step 2: Fingerprint ──────────────────────────────────────────────
        let fingerprint = self.fingerprinter.fingerprint(&request)?;
        request.attempt_number = self.with_runtime(&workflow_id, |rt| {
            let attempts = rt.attempts.entry(fingerprint.digest.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        });
        debug!(
            workflow_id = %workflow_id,
            action = %fingerprint,
            digest = %fingerprint.short(),
            attempt = request.attempt_number,
            "action submitted"
        );

        // ── Step 3: Admission ────────────────────────────────────────────────
        self.governor.validate_request(&request).into_result()?;
        let estimate = self.governor.estimate_cost(&request);
        self.governor.try_admit(estimate)?;

        // ── Step 4: Breaker gate ─────────────────────────────────────────────
        let dependency = self.executor.dependency(&request);
        if let Err(err) = self.breakers.check(&dependency) {
            return Err(self.unavailable(&request, &fingerprint, estimate, err));
        }

        // ── Step 5: Idempotency ──────────────────────────────────────────────
        if let Some(record) = self.idempotency.get_result(&fingerprint).await? {
            self.governor.settle(estimate, 0.0);
            info!(
                workflow_id = %workflow_id,
                action = %fingerprint,
                completed_at = %record.completed_at,
                "already completed, replaying cached result"
            );
            self.metrics.action_finished(&request.kind, "replayed", 0.0);
            return Ok(ActionOutcome::AlreadyCompleted {
                fingerprint,
                result_summary: record.result_summary,
                completed_at: record.completed_at,
            });
        }

        // ── Step 6: Approval ─────────────────────────────────────────────────
        let gated = self.governor.classify(&request.kind) == ActionClass::RequiresApproval;
        if gated {
            let approved =
                self.with_runtime(&workflow_id, |rt| rt.approved.remove(&fingerprint.digest));
            if !approved {
                self.governor.settle(estimate, 0.0);
                return Ok(self.request_approval(&request, fingerprint).await);
            }
            info!(workflow_id = %workflow_id, action = %fingerprint, "running approved action");
        }

        // ── Step 7: Breaker permit ───────────────────────────────────────────
        //
        // No lock is held from here to the end of the call; the breaker's
        // own critical sections cover only its state fields.
        let breaker = self.breakers.breaker(&dependency);
        let permit = match breaker.acquire() {
            Ok(permit) => permit,
            Err(err) => {
                // The grant was not used; keep it for the retry.
                if gated {
                    self.with_runtime(&workflow_id, |rt| {
                        rt.approved.insert(fingerprint.digest.clone())
                    });
                }
                return Err(self.unavailable(&request, &fingerprint, estimate, err));
            }
        };

        // ── Step 8: Iteration budget ─────────────────────────────────────────
        //
        // Charged only once a permit is held, so breaker rejections never
        // count as iterations. An unresolved permit hands back its slot.
        let budget_signal =
            self.with_runtime(&workflow_id, |rt| rt.detector.check_iteration_budget(&workflow_id));
        if let Some(signal) = budget_signal {
            drop(permit);
            self.governor.settle(estimate, 0.0);
            return Err(self.halt(&workflow_id, signal).await);
        }

        // ── Step 9: Execute ──────────────────────────────────────────────────
        let started = Instant::now();
        let result = self.execute_with_timeout(&request).await;
        let latency = started.elapsed();

        match result {
            Err(err) => {
                permit.fail(&err);
                self.latency.record(latency);
                self.metrics
                    .action_finished(&request.kind, "failed", latency.as_secs_f64());
                warn!(workflow_id = %workflow_id, action = %fingerprint, error = %err, "action failed");
                let signal = self.with_runtime(&workflow_id, |rt| {
                    let state = rt.last_state.clone();
                    rt.detector
                        .record(fingerprint.clone(), state.clone(), state, HistoryOutcome::Failed);
                    rt.detector.check_repetition(&fingerprint)
                });
                match signal {
                    Some(signal) => Err(self.halt(&workflow_id, signal).await),
                    None => Err(err),
                }
            }
            Ok(report) => {
                permit.succeed();
                self.finish(&workflow_id, &request, fingerprint, report, estimate, latency)
                    .await
            }
        }
    }

    /// A breaker refused the call: nothing ran, so nothing is charged or
    /// recorded.
    fn unavailable(
        &self,
        request: &ActionRequest,
        fingerprint: &Fingerprint,
        estimate: f64,
        err: TripwireError,
    ) -> TripwireError {
        self.governor.settle(estimate, 0.0);
        self.metrics.action_finished(&request.kind, "rejected", 0.0);
        warn!(
            workflow_id = %request.workflow_id,
            action = %fingerprint,
            error = %err,
            "dependency unavailable"
        );
        err
    }

    async fn execute_with_timeout(&self, request: &ActionRequest) -> TripwireResult<ExecutionReport> {
        let timeout_ms = self.config.supervisor.action_timeout_ms;
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.executor.execute(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TripwireError::ActionTimedOut {
                action: format!("{}:{}", request.kind, request.target),
                timeout_ms,
            }),
        }
    }

    /// Steps 10 and 11 for an executor call that returned a report.
    async fn finish(
        &self,
        workflow_id: &WorkflowId,
        request: &ActionRequest,
        fingerprint: Fingerprint,
        report: ExecutionReport,
        estimate: f64,
        latency: Duration,
    ) -> TripwireResult<ActionOutcome> {
        self.latency.record(latency);
        self.governor.settle(estimate, report.cost.unwrap_or(estimate));

        let state_after = match &report.observed_state {
            Some(state) => match self.fingerprinter.fingerprint_state(state) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "observed state could not be fingerprinted");
                    None
                }
            },
            None => None,
        };
        let state_before = self.with_runtime(workflow_id, |rt| rt.last_state.clone());
        let outcome = if report.converged {
            HistoryOutcome::Converged
        } else {
            HistoryOutcome::Unresolved
        };

        // The idempotency record is written before the checkpoint of the
        // same step, so a stored checkpoint always implies its record.
        let step_index = if report.converged {
            self.idempotency
                .record_completion(&fingerprint, report.summary.clone())
                .await?;
            let step = self.with_runtime(workflow_id, |rt| rt.next_step);
            let state = json!({
                "action": fingerprint.label,
                "digest": fingerprint.digest,
                "result_summary": report.summary,
                "state_fingerprint": state_after.as_ref().or(state_before.as_ref()).map(|s| s.0.clone()),
                "observed_state": report.observed_state,
            });
            self.checkpoints.save(workflow_id, step, state).await?;
            self.with_runtime(workflow_id, |rt| rt.next_step = step + 1);
            Some(step)
        } else {
            None
        };

        let signal = self.with_runtime(workflow_id, |rt| {
            rt.detector.record(
                fingerprint.clone(),
                state_before.clone(),
                state_after.clone(),
                outcome,
            );
            if state_after.is_some() {
                rt.last_state = state_after.clone();
            }
            rt.detector.check_repetition(&fingerprint).or_else(|| {
                state_after
                    .as_ref()
                    .and_then(|state| rt.detector.check_state_revisit(state))
            })
        });

        self.metrics
            .action_finished(&request.kind, outcome.as_str(), latency.as_secs_f64());
        debug!(
            workflow_id = %workflow_id,
            action = %fingerprint,
            outcome = outcome.as_str(),
            step_index = ?step_index,
            latency_ms = latency.as_millis() as u64,
            "action finished"
        );

        if let Some(signal) = signal {
            return Err(self.halt(workflow_id, signal).await);
        }
        Ok(ActionOutcome::Executed {
            fingerprint,
            result_summary: report.summary,
            converged: report.converged,
            step_index,
        })
    }

    // ── Halting and escalation ────────────────────────────────────────────────

    /// Halt `workflow_id` on `signal`, escalate, and return the error to
    /// surface.
    async fn halt(&self, workflow_id: &WorkflowId, signal: LoopSignal) -> TripwireError {
        self.metrics.loop_detected(signal.reason);
        let circuit_states = self.breakers.states();
        let history_len = self.config.supervisor.halt_history_len;
        let now = self.clock.now();

        let report = self.with_runtime(workflow_id, |rt| {
            let report = HaltReport {
                workflow_id: Some(workflow_id.clone()),
                explanation: signal.explanation.clone(),
                threshold: Threshold {
                    name: signal.reason.threshold_name().to_string(),
                    limit: signal.limit,
                    observed: signal.count,
                },
                recent_history: rt.detector.recent_history(history_len),
                circuit_states,
                raised_at: now,
                cause: HaltCause::Loop(signal),
            };
            rt.halted = Some(report.clone());
            report
        });

        error!(
            workflow_id = %workflow_id,
            code = report.code(),
            "workflow halted: {}",
            report.explanation
        );
        self.escalate(&report).await;
        TripwireError::LoopDetected(Box::new(report))
    }

    async fn request_approval(&self, request: &ActionRequest, fingerprint: Fingerprint) -> ActionOutcome {
        let workflow_id = &request.workflow_id;
        let reason = format!("action kind '{}' requires human approval", request.kind);
        let history_len = self.config.supervisor.halt_history_len;

        let (first_request, recent_history) = self.with_runtime(workflow_id, |rt| {
            (
                rt.pending_approval.insert(fingerprint.digest.clone()),
                rt.detector.recent_history(history_len),
            )
        });

        if first_request {
            let report = HaltReport {
                workflow_id: Some(workflow_id.clone()),
                cause: HaltCause::ApprovalRequired {
                    action: fingerprint.label.clone(),
                    reason: reason.clone(),
                },
                explanation: format!("{fingerprint} is waiting for approval: {reason}"),
                threshold: Threshold {
                    name: "approval_required".to_string(),
                    limit: 0,
                    observed: 1,
                },
                recent_history,
                circuit_states: self.breakers.states(),
                raised_at: self.clock.now(),
            };
            info!(workflow_id = %workflow_id, action = %fingerprint, "action awaiting approval");
            self.escalate(&report).await;
        } else {
            debug!(workflow_id = %workflow_id, action = %fingerprint, "approval still pending");
        }

        ActionOutcome::AwaitingApproval {
            fingerprint,
            reason,
        }
    }

    async fn escalate(&self, report: &HaltReport) {
        if let Err(e) = self.escalation.escalate(report).await {
            error!(code = report.code(), error = %e, "escalation channel failed");
        }
    }

    /// Let the next submission of `fingerprint` in `workflow_id` run.
    ///
    /// Returns true if the action was waiting for approval. Granting an
    /// action that never asked, or one in an unknown workflow, does nothing.
    pub fn grant_approval(&self, workflow_id: &WorkflowId, fingerprint: &Fingerprint) -> bool {
        let was_pending = self.with_existing(workflow_id, |rt| {
            let pending = rt.pending_approval.remove(&fingerprint.digest);
            if pending {
                rt.approved.insert(fingerprint.digest.clone());
            }
            pending
        });
        let was_pending = was_pending.unwrap_or(false);
        if was_pending {
            info!(workflow_id = %workflow_id, action = %fingerprint, "approval granted");
        } else {
            warn!(workflow_id = %workflow_id, action = %fingerprint, "approval granted for an action that was not waiting");
        }
        was_pending
    }

    // ── Workflow lifecycle ────────────────────────────────────────────────────

    /// Prepare `workflow_id` to run, resuming after its last checkpoint.
    ///
    /// Steps at or before the checkpoint are assumed complete; resubmitting
    /// them replays their idempotency records instead of executing.
    pub async fn start_workflow(&self, workflow_id: &WorkflowId) -> TripwireResult<WorkflowResume> {
        self.with_runtime(workflow_id, |rt| -> TripwireResult<()> {
            if let Some(report) = &rt.halted {
                return Err(TripwireError::WorkflowHalted {
                    workflow_id: workflow_id.to_string(),
                    code: report.code().to_string(),
                });
            }
            if rt.in_flight {
                return Err(TripwireError::WorkflowBusy {
                    workflow_id: workflow_id.to_string(),
                });
            }
            Ok(())
        })?;
        let resume = self.restore(workflow_id).await?;
        info!(workflow_id = %workflow_id, next_step = resume.next_step, "workflow started");
        Ok(resume)
    }

    async fn restore(&self, workflow_id: &WorkflowId) -> TripwireResult<WorkflowResume> {
        let resume = self.checkpoints.resume(workflow_id).await?;
        let restored_state = resume
            .checkpoint
            .as_ref()
            .and_then(|c| c.serialized_state.get("state_fingerprint"))
            .and_then(|v| v.as_str())
            .map(|s| StateFingerprint(s.to_string()));
        self.with_runtime(workflow_id, |rt| {
            rt.next_step = rt.next_step.max(resume.next_step);
            if rt.last_state.is_none() {
                rt.last_state = restored_state;
            }
            rt.resumed = true;
        });
        if resume.checkpoint.is_some() {
            debug!(workflow_id = %workflow_id, next_step = resume.next_step, "resuming from checkpoint");
        }
        Ok(resume)
    }

    /// Mark `workflow_id` finished: its checkpoint is deleted and its
    /// runtime state dropped. This is also how a halted or cancelled
    /// workflow is closed out once a human has dealt with it.
    pub async fn complete_workflow(&self, workflow_id: &WorkflowId) -> TripwireResult<()> {
        {
            let mut workflows = self.lock_workflows();
            if workflows.get(workflow_id).is_some_and(|rt| rt.in_flight) {
                return Err(TripwireError::WorkflowBusy {
                    workflow_id: workflow_id.to_string(),
                });
            }
            workflows.remove(workflow_id);
        }
        self.checkpoints.clear(workflow_id).await?;
        info!(workflow_id = %workflow_id, "workflow completed");
        Ok(())
    }

    /// Cancel `workflow_id`. An action already in flight finishes or times
    /// out; every later submission fails with `WorkflowCancelled`. The
    /// checkpoint is kept.
    ///
    /// Returns false if the workflow has not been started or submitted to.
    pub fn cancel_workflow(&self, workflow_id: &WorkflowId) -> bool {
        let known = self
            .with_existing(workflow_id, |rt| rt.cancel.cancel())
            .is_some();
        if known {
            info!(workflow_id = %workflow_id, "workflow cancelled");
        } else {
            debug!(workflow_id = %workflow_id, "cancel ignored for unknown workflow");
        }
        known
    }

    /// The token that `cancel_workflow` fires for `workflow_id`.
    pub fn cancellation_token(&self, workflow_id: &WorkflowId) -> Option<CancellationToken> {
        self.with_existing(workflow_id, |rt| rt.cancel.clone())
    }

    /// The halt report, if `workflow_id` was halted.
    pub fn workflow_report(&self, workflow_id: &WorkflowId) -> Option<HaltReport> {
        self.lock_workflows()
            .get(workflow_id)
            .and_then(|rt| rt.halted.clone())
    }

    pub fn workflow_stats(&self, workflow_id: &WorkflowId) -> Option<LoopStats> {
        self.lock_workflows()
            .get(workflow_id)
            .map(|rt| rt.detector.stats())
    }

    // ── Delegation ────────────────────────────────────────────────────────────

    /// A fresh call stack bounded by `max_call_depth`.
    pub fn new_call_stack(&self) -> CallStack {
        CallStack::new(self.config.loop_detector.max_call_depth)
    }

    /// Delegate from the top of `stack` to `agent` on behalf of
    /// `workflow_id`. A circular or too-deep delegation halts the workflow.
    pub async fn enter_delegate(
        &self,
        workflow_id: &WorkflowId,
        stack: &mut CallStack,
        agent: AgentId,
    ) -> TripwireResult<usize> {
        match stack.push_frame(agent) {
            Ok(depth) => {
                debug!(workflow_id = %workflow_id, depth, "delegated");
                Ok(depth)
            }
            Err(signal) => Err(self.halt(workflow_id, signal).await),
        }
    }

    /// Return from the innermost delegate.
    pub fn exit_delegate(&self, stack: &mut CallStack) -> Option<AgentId> {
        stack.pop_frame()
    }

    // ── Health and self-heal ──────────────────────────────────────────────────

    /// Evaluate health once. While unhealthy, every remediation is tried;
    /// after `max_self_heal_failures` consecutive unhealthy ticks autonomy is
    /// suspended and `EscalateToHuman` is returned (once per suspension).
    pub async fn health_tick(&self) -> TripwireResult<HealthSnapshot> {
        let snapshot = self.health.evaluate();
        if snapshot.status != HealthStatus::Unhealthy {
            debug!(status = snapshot.status.as_str(), "health check");
            return Ok(snapshot);
        }

        warn!(
            consecutive = snapshot.consecutive_unhealthy,
            failed = ?snapshot.failed_checks,
            "unhealthy, attempting self-heal"
        );
        self.health.remediate().await;

        let limit = self.config.supervisor.max_self_heal_failures;
        if snapshot.consecutive_unhealthy < limit {
            return Ok(snapshot);
        }

        let report = HaltReport {
            workflow_id: None,
            cause: HaltCause::SelfHealExhausted {
                consecutive_failures: snapshot.consecutive_unhealthy,
                limit,
                failed_checks: snapshot.failed_checks.clone(),
            },
            explanation: format!(
                "{} consecutive unhealthy checks (failing: {}); self-heal exhausted",
                snapshot.consecutive_unhealthy,
                snapshot.failed_checks.join(", ")
            ),
            threshold: Threshold {
                name: "max_self_heal_failures".to_string(),
                limit: u64::from(limit),
                observed: u64::from(snapshot.consecutive_unhealthy),
            },
            recent_history: Vec::new(),
            circuit_states: self.breakers.states(),
            raised_at: self.clock.now(),
        };
        {
            let mut suspension = self.suspension.lock().unwrap_or_else(|e| e.into_inner());
            if suspension.is_some() {
                return Ok(snapshot);
            }
            *suspension = Some(report.clone());
        }

        error!(code = report.code(), "autonomy suspended: {}", report.explanation);
        self.escalate(&report).await;
        Err(TripwireError::EscalateToHuman(Box::new(report)))
    }

    /// Lift a self-heal suspension. Returns true if one was in place.
    pub fn resume_autonomy(&self) -> bool {
        let lifted = self
            .suspension
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        self.health.reset_streak();
        if lifted {
            info!("autonomy resumed");
        }
        lifted
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension().is_some()
    }

    /// Run `health_tick` every `health_check_interval_secs` until `shutdown`
    /// fires.
    pub fn spawn_health_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        let period = Duration::from_secs(self.config.supervisor.health_check_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("health loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = supervisor.health_tick().await {
                            warn!(error = %e, "health tick escalated");
                        }
                    }
                }
            }
        })
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// The most recent health snapshot.
    pub fn get_health(&self) -> HealthSnapshot {
        self.health.latest()
    }

    pub fn get_circuit_states(&self) -> BTreeMap<String, CircuitState> {
        self.breakers.states()
    }

    pub fn budget(&self) -> BudgetSnapshot {
        self.governor.snapshot()
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    /// Workflows with live runtime state (running, halted, or cancelled).
    pub fn workflow_count(&self) -> usize {
        self.lock_workflows().len()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn suspension(&self) -> Option<HaltReport> {
        self.suspension
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_workflows(&self) -> MutexGuard<'_, HashMap<WorkflowId, WorkflowRuntime>> {
        self.workflows.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` on the runtime for `workflow_id`, creating it if needed.
    fn with_runtime<R>(&self, workflow_id: &WorkflowId, f: impl FnOnce(&mut WorkflowRuntime) -> R) -> R {
        let mut workflows = self.lock_workflows();
        let runtime = workflows.entry(workflow_id.clone()).or_insert_with(|| {
            WorkflowRuntime::new(self.config.loop_detector.clone(), Arc::clone(&self.clock))
        });
        f(runtime)
    }

    /// Run `f` on the runtime for `workflow_id` only if it already exists.
    fn with_existing<R>(
        &self,
        workflow_id: &WorkflowId,
        f: impl FnOnce(&mut WorkflowRuntime) -> R,
    ) -> Option<R> {
        self.lock_workflows().get_mut(workflow_id).map(f)
    }

    fn begin(&self, workflow_id: &WorkflowId) -> TripwireResult<InFlight<'_>> {
        self.with_runtime(workflow_id, |rt| {
            if let Some(report) = &rt.halted {
                return Err(TripwireError::WorkflowHalted {
                    workflow_id: workflow_id.to_string(),
                    code: report.code().to_string(),
                });
            }
            if rt.cancel.is_cancelled() {
                return Err(TripwireError::WorkflowCancelled {
                    workflow_id: workflow_id.to_string(),
                });
            }
            if rt.in_flight {
                return Err(TripwireError::WorkflowBusy {
                    workflow_id: workflow_id.to_string(),
                });
            }
            rt.in_flight = true;
            Ok(())
        })?;
        Ok(InFlight {
            workflows: &self.workflows,
            workflow_id: workflow_id.clone(),
        })
    }
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Assembles a [`Supervisor`]. Everything but the config and executor is
/// optional:
///
/// - escalation defaults to [`LogEscalation`]
/// - metrics default to [`NoopMetrics`]
/// - stores default to a `FileStore` under `store.data_dir`, or a
///   `MemoryStore` when no directory is configured
/// - the clock defaults to [`SystemClock`]
///
/// The connectivity and latency probes and the expired-record purge are
/// always installed; `probe` and `remediation` add to them.
pub struct SupervisorBuilder {
    config: TripwireConfig,
    executor: Arc<dyn ActionExecutor>,
    escalation: Option<Arc<dyn EscalationChannel>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    clock: Option<Arc<dyn Clock>>,
    probes: Vec<Arc<dyn HealthProbe>>,
    remediations: Vec<Arc<dyn Remediation>>,
}

impl SupervisorBuilder {
    pub fn new(config: TripwireConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            config,
            executor,
            escalation: None,
            metrics: None,
            idempotency_store: None,
            checkpoint_store: None,
            clock: None,
            probes: Vec::new(),
            remediations: Vec::new(),
        }
    }

    pub fn escalation(mut self, channel: Arc<dyn EscalationChannel>) -> Self {
        self.escalation = Some(channel);
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Use one backend for both idempotency records and checkpoints.
    pub fn store<S>(mut self, store: Arc<S>) -> Self
    where
        S: IdempotencyStore + CheckpointStore + 'static,
    {
        let idempotency: Arc<dyn IdempotencyStore> = store.clone();
        let checkpoints: Arc<dyn CheckpointStore> = store;
        self.idempotency_store = Some(idempotency);
        self.checkpoint_store = Some(checkpoints);
        self
    }

    pub fn idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency_store = Some(store);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn remediation(mut self, remediation: Arc<dyn Remediation>) -> Self {
        self.remediations.push(remediation);
        self
    }

    /// Validate the configuration and wire every component.
    ///
    /// # Errors
    ///
    /// `ConfigError` for invalid configuration (including governor kind names
    /// and schemas); `StoreError` if the file store cannot be opened.
    pub async fn build(self) -> TripwireResult<Supervisor> {
        let config = self.config;
        config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let metrics: Arc<dyn MetricsSink> = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(NoopMetrics),
        };
        let escalation: Arc<dyn EscalationChannel> = match self.escalation {
            Some(channel) => channel,
            None => Arc::new(LogEscalation),
        };

        let (idempotency_store, checkpoint_store) =
            match (self.idempotency_store, self.checkpoint_store) {
                (Some(idempotency), Some(checkpoints)) => (idempotency, checkpoints),
                (idempotency, checkpoints) => {
                    let (default_idempotency, default_checkpoints) =
                        default_stores(&config).await?;
                    (
                        idempotency.unwrap_or(default_idempotency),
                        checkpoints.unwrap_or(default_checkpoints),
                    )
                }
            };

        let governor = Governor::new(
            config.governor.clone(),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        )?;
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker.clone(),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        ));
        let idempotency = Arc::new(IdempotencyGuard::new(
            idempotency_store,
            Duration::from_secs(config.store.idempotency_ttl_secs),
            Arc::clone(&clock),
        ));
        let checkpoints = CheckpointManager::new(
            checkpoint_store,
            Duration::from_secs(config.store.checkpoint_retention_secs),
            Arc::clone(&clock),
        );
        let latency = Arc::new(LatencyTracker::new(config.supervisor.latency_window));

        let mut probes: Vec<Arc<dyn HealthProbe>> = Vec::new();
        probes.push(Arc::new(ConnectivityProbe::new(Arc::clone(&breakers))));
        probes.push(Arc::new(LatencyProbe::new(
            Arc::clone(&latency),
            Duration::from_millis(config.supervisor.max_avg_latency_ms),
        )));
        probes.extend(self.probes);

        let mut remediations: Vec<Arc<dyn Remediation>> = Vec::new();
        remediations.push(Arc::new(PurgeExpiredRecords::new(Arc::clone(&idempotency))));
        remediations.extend(self.remediations);

        let health = HealthMonitor::new(
            probes,
            remediations,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );

        info!(
            probes = ?health.probe_names(),
            max_self_heal_failures = config.supervisor.max_self_heal_failures,
            "supervisor ready"
        );

        Ok(Supervisor {
            fingerprinter: Fingerprinter::new(config.fingerprint.clone()),
            config,
            executor: self.executor,
            escalation,
            metrics,
            clock,
            governor,
            breakers,
            idempotency,
            checkpoints,
            health,
            latency,
            workflows: Mutex::new(HashMap::new()),
            suspension: Mutex::new(None),
        })
    }
}

async fn default_stores(
    config: &TripwireConfig,
) -> TripwireResult<(Arc<dyn IdempotencyStore>, Arc<dyn CheckpointStore>)> {
    match &config.store.data_dir {
        Some(dir) => {
            let store = Arc::new(FileStore::open(dir.clone()).await?);
            let idempotency: Arc<dyn IdempotencyStore> = store.clone();
            let checkpoints: Arc<dyn CheckpointStore> = store;
            Ok((idempotency, checkpoints))
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            let idempotency: Arc<dyn IdempotencyStore> = store.clone();
            let checkpoints: Arc<dyn CheckpointStore> = store;
            Ok((idempotency, checkpoints))
        }
    }
}
