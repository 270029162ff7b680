//! Action request types.
//!
//! An `ActionRequest` is what the diagnosing agent hands to the guard. It is
//! immutable once built; the fingerprinter derives its identity from
//! `kind`, `target`, and the non-volatile `parameters`.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for one workflow instance.
///
/// A workflow owns one sequential action loop, one action history window,
/// and at most one live checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, random workflow id.
    pub fn generate() -> Self {
        Self(format!("wf-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of an agent (or delegate) on a delegation call stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The closed set of action kinds the guard knows how to reason about.
///
/// Anything else parses to `Unrecognized`, which the governor always rejects
/// as unauthorized. There is no open-ended dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Restart a workload (delete the pod, let its controller recreate it).
    Restart,
    /// Set the replica count of a workload to an absolute value.
    Scale,
    /// Roll a deployment back to a known revision.
    Rollback,
    /// Set absolute CPU/memory limits on a workload.
    SetResourceLimits,
    /// Flush an application-level cache.
    ClearCache,
    /// Read-only status probe.
    CheckStatus,
    /// Read-only log fetch.
    FetchLogs,
    /// Read-only metrics query.
    QueryMetrics,
    /// Send a notification to a human-facing channel.
    Notify,
    /// Anything outside the known catalog.
    Unrecognized(String),
}

impl ActionKind {
    /// Every known (authorizable) kind, in declaration order.
    pub const KNOWN: [ActionKind; 9] = [
        ActionKind::Restart,
        ActionKind::Scale,
        ActionKind::Rollback,
        ActionKind::SetResourceLimits,
        ActionKind::ClearCache,
        ActionKind::CheckStatus,
        ActionKind::FetchLogs,
        ActionKind::QueryMetrics,
        ActionKind::Notify,
    ];

    /// Parse a kind name. Accepts snake-case, kebab-case, and a few aliases
    /// agents commonly emit (`restart_pod`, `scale_deployment`, ...).
    pub fn parse(name: &str) -> Self {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "restart" | "restart_pod" | "restart_service" => Self::Restart,
            "scale" | "scale_deployment" | "set_replicas" => Self::Scale,
            "rollback" | "rollback_deployment" => Self::Rollback,
            "set_resource_limits" | "set_limits" => Self::SetResourceLimits,
            "clear_cache" => Self::ClearCache,
            "check_status" | "check_pod_status" => Self::CheckStatus,
            "fetch_logs" | "check_logs" | "analyze_logs" => Self::FetchLogs,
            "query_metrics" | "check_metrics" => Self::QueryMetrics,
            "notify" => Self::Notify,
            _ => Self::Unrecognized(name.trim().to_string()),
        }
    }

    /// Canonical snake-case name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Restart => "restart",
            Self::Scale => "scale",
            Self::Rollback => "rollback",
            Self::SetResourceLimits => "set_resource_limits",
            Self::ClearCache => "clear_cache",
            Self::CheckStatus => "check_status",
            Self::FetchLogs => "fetch_logs",
            Self::QueryMetrics => "query_metrics",
            Self::Notify => "notify",
            Self::Unrecognized(name) => name,
        }
    }

    /// True for kinds that change infrastructure state. Only these need the
    /// absolute-desired-state check and idempotency protection matters most
    /// for them.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Restart | Self::Scale | Self::Rollback | Self::SetResourceLimits | Self::ClearCache
        )
    }

    /// The external dependency a call of this kind goes through, used as the
    /// default circuit breaker key.
    pub fn default_dependency(&self) -> &'static str {
        match self {
            Self::Restart | Self::Scale | Self::Rollback | Self::SetResourceLimits => "orchestrator",
            Self::ClearCache | Self::CheckStatus => "orchestrator",
            Self::FetchLogs => "log-store",
            Self::QueryMetrics => "metrics-backend",
            Self::Notify => "notifier",
            Self::Unrecognized(_) => "unknown",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// A request to perform one action on behalf of a workflow.
///
/// `attempt_number` and any parameter named in `volatile` are incidental:
/// they never contribute to the action's fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    /// The resource the action targets (e.g. a pod or deployment name).
    pub target: String,
    /// Action arguments. Must be a JSON object (or null for none).
    pub parameters: serde_json::Value,
    pub workflow_id: WorkflowId,
    /// 1-based count of submissions of this fingerprint within the workflow.
    pub attempt_number: u32,
    /// Parameter keys the caller marks as volatile (excluded from identity).
    #[serde(default)]
    pub volatile: BTreeSet<String>,
}

impl ActionRequest {
    pub fn new(
        workflow_id: WorkflowId,
        kind: ActionKind,
        target: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            target: target.into(),
            parameters,
            workflow_id,
            attempt_number: 1,
            volatile: BTreeSet::new(),
        }
    }

    pub fn with_attempt(mut self, attempt_number: u32) -> Self {
        self.attempt_number = attempt_number;
        self
    }

    pub fn with_volatile(mut self, key: impl Into<String>) -> Self {
        self.volatile.insert(key.into());
        self
    }
}

/// What the pluggable executor reports after running an action.
///
/// `converged` is the executor's judgement that the desired state was
/// reached. An action that ran but left the world unchanged ("still
/// failing") is `converged = false`: it is recorded in the history but never
/// cached as completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub summary: String,
    pub converged: bool,
    /// The observed world state after the action, if the executor reports one.
    #[serde(default)]
    pub observed_state: Option<serde_json::Value>,
    /// Actual cost incurred, if known. Used to settle the cost ledger.
    #[serde(default)]
    pub cost: Option<f64>,
}

impl ExecutionReport {
    pub fn converged(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            converged: true,
            observed_state: None,
            cost: None,
        }
    }

    pub fn unresolved(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            converged: false,
            observed_state: None,
            cost: None,
        }
    }

    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.observed_state = Some(state);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}
