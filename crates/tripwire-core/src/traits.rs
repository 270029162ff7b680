//! Trait seams between the guard and its collaborators.
//!
//! The guard never hardcodes remediation logic, storage, paging, or metrics.
//! Each of those is a trait the hosting application implements:
//!
//! - `ActionExecutor`: untrusted; performs the actual remediation
//! - `IdempotencyStore`: durable; remembers completed fingerprints
//! - `CheckpointStore`: durable; remembers workflow progress
//! - `EscalationChannel`: human-facing; receives halt reports
//! - `MetricsSink`: observability; counters and gauges
//! - `HealthProbe` / `Remediation`: inputs to the self-heal loop

use async_trait::async_trait;

use tripwire_contracts::{
    action::{ActionKind, ActionRequest, ExecutionReport, WorkflowId},
    circuit::CircuitStatus,
    error::TripwireResult,
    execution::{Checkpoint, IdempotencyRecord},
    health::CheckResult,
    identity::Fingerprint,
    signal::{HaltReport, LoopReason},
};

/// Performs actions on behalf of the guarded agent.
///
/// Implementations are **untrusted**. The supervisor only calls `execute()`
/// after admission, idempotency, and breaker gates have passed, and wraps
/// every call in a timeout. Side-effecting actions must set an absolute
/// desired state ("ensure replicas = 3"), never apply a relative delta.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Run the action and report what happened.
    ///
    /// Return `Err` for transport-level failures (timeouts, connection
    /// errors); these count against the dependency's circuit breaker.
    /// An action that ran but did not fix anything is `Ok` with
    /// `converged = false`.
    async fn execute(&self, request: &ActionRequest) -> TripwireResult<ExecutionReport>;

    /// The dependency key this request's call goes through.
    fn dependency(&self, request: &ActionRequest) -> String {
        request.kind.default_dependency().to_string()
    }
}

/// Durable storage for idempotency records.
///
/// Implementations must make `put_if_absent` atomic: of two concurrent
/// writers for the same digest, exactly one wins.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> TripwireResult<Option<IdempotencyRecord>>;

    /// Store `record` unless one exists for its digest. Returns true if stored.
    async fn put_if_absent(&self, record: IdempotencyRecord) -> TripwireResult<bool>;

    async fn remove(&self, fingerprint: &Fingerprint) -> TripwireResult<()>;

    /// Every stored record. Used by eager TTL sweeps.
    async fn list(&self) -> TripwireResult<Vec<IdempotencyRecord>>;
}

/// Durable storage for workflow checkpoints.
///
/// A reader must never observe a partially written checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, workflow_id: &WorkflowId) -> TripwireResult<Option<Checkpoint>>;

    /// Replace the stored checkpoint only if `checkpoint.step_index` is
    /// strictly greater than the stored one (or none is stored).
    ///
    /// Returns `Ok(None)` when written, or `Ok(Some(last))` with the stored
    /// step index when the write was refused.
    async fn put_if_newer(&self, checkpoint: Checkpoint) -> TripwireResult<Option<u64>>;

    async fn delete(&self, workflow_id: &WorkflowId) -> TripwireResult<()>;
}

/// Human-facing notification channel (paging, chat, ticketing).
#[async_trait]
pub trait EscalationChannel: Send + Sync {
    async fn escalate(&self, report: &HaltReport) -> TripwireResult<()>;
}

/// Counters and gauges the guard emits.
///
/// Every method has a no-op default so sinks implement only what they
/// export.
pub trait MetricsSink: Send + Sync {
    fn circuit_state_changed(&self, _dependency: &str, _status: CircuitStatus) {}

    fn loop_detected(&self, _reason: LoopReason) {}

    fn request_admitted(&self) {}

    fn request_rejected(&self, _reason: &str) {}

    fn self_heal_attempted(&self, _remediation: &str, _succeeded: bool) {}

    fn action_finished(&self, _kind: &ActionKind, _outcome: &str, _latency_secs: f64) {}
}

/// A metrics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// One health check evaluated on every supervisor tick.
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self) -> CheckResult;
}

/// A bounded local fix the supervisor tries while unhealthy.
#[async_trait]
pub trait Remediation: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self) -> TripwireResult<()>;
}
