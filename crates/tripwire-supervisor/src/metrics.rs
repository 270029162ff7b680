//! Prometheus implementation of the `MetricsSink` trait.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `tripwire_circuit_state` | Gauge (0 closed, 1 half-open, 2 open) | `dependency` |
//! | `tripwire_loop_faults_total` | Counter | `reason` |
//! | `tripwire_admission_total` | Counter | `decision`, `reason` |
//! | `tripwire_self_heal_attempts_total` | Counter | `remediation`, `result` |
//! | `tripwire_actions_total` | Counter | `kind`, `outcome` |
//! | `tripwire_action_duration_seconds` | Histogram | `kind` |

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

use tripwire_contracts::{action::ActionKind, circuit::CircuitStatus, signal::LoopReason};
use tripwire_core::traits::MetricsSink;

/// Label values longer than this are cut, so an agent cannot blow up label
/// cardinality with long dependency or kind names.
pub const MAX_LABEL_VALUE_LEN: usize = 64;

pub const ACTION_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    circuit_state: GaugeVec,
    loop_faults_total: CounterVec,
    admission_total: CounterVec,
    self_heal_attempts_total: CounterVec,
    actions_total: CounterVec,
    action_duration: HistogramVec,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    /// Register every tripwire metric with a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Register every tripwire metric with `registry`.
    ///
    /// # Errors
    ///
    /// Fails if a metric with the same name is already registered.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let circuit_state = GaugeVec::new(
            Opts::new(
                "tripwire_circuit_state",
                "Circuit breaker state per dependency (0 closed, 1 half-open, 2 open)",
            ),
            &["dependency"],
        )?;
        registry.register(Box::new(circuit_state.clone()))?;

        let loop_faults_total = CounterVec::new(
            Opts::new("tripwire_loop_faults_total", "Loop faults raised, by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(loop_faults_total.clone()))?;

        let admission_total = CounterVec::new(
            Opts::new(
                "tripwire_admission_total",
                "Admission decisions, by decision and rejection reason",
            ),
            &["decision", "reason"],
        )?;
        registry.register(Box::new(admission_total.clone()))?;

        let self_heal_attempts_total = CounterVec::new(
            Opts::new(
                "tripwire_self_heal_attempts_total",
                "Local remediation attempts while unhealthy",
            ),
            &["remediation", "result"],
        )?;
        registry.register(Box::new(self_heal_attempts_total.clone()))?;

        let actions_total = CounterVec::new(
            Opts::new("tripwire_actions_total", "Actions finished, by kind and outcome"),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(actions_total.clone()))?;

        let action_duration = HistogramVec::new(
            HistogramOpts::new(
                "tripwire_action_duration_seconds",
                "Wall time of executor calls",
            )
            .buckets(ACTION_DURATION_BUCKETS.to_vec()),
            &["kind"],
        )?;
        registry.register(Box::new(action_duration.clone()))?;

        Ok(Self {
            registry,
            circuit_state,
            loop_faults_total,
            admission_total,
            self_heal_attempts_total,
            actions_total,
            action_duration,
        })
    }

    /// Everything registered, in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl MetricsSink for PrometheusMetrics {
    fn circuit_state_changed(&self, dependency: &str, status: CircuitStatus) {
        self.circuit_state
            .with_label_values(&[truncate_label(dependency)])
            .set(status.as_gauge());
    }

    fn loop_detected(&self, reason: LoopReason) {
        self.loop_faults_total
            .with_label_values(&[reason.code()])
            .inc();
    }

    fn request_admitted(&self) {
        self.admission_total
            .with_label_values(&["admitted", "none"])
            .inc();
    }

    fn request_rejected(&self, reason: &str) {
        self.admission_total
            .with_label_values(&["rejected", truncate_label(reason)])
            .inc();
    }

    fn self_heal_attempted(&self, remediation: &str, succeeded: bool) {
        let result = if succeeded { "success" } else { "failure" };
        self.self_heal_attempts_total
            .with_label_values(&[truncate_label(remediation), result])
            .inc();
    }

    fn action_finished(&self, kind: &ActionKind, outcome: &str, latency_secs: f64) {
        let kind = truncate_label(kind.as_str());
        self.actions_total
            .with_label_values(&[kind, truncate_label(outcome)])
            .inc();
        self.action_duration
            .with_label_values(&[kind])
            .observe(latency_secs);
    }
}

/// Cut `value` to at most `MAX_LABEL_VALUE_LEN` bytes on a char boundary.
fn truncate_label(value: &str) -> &str {
    if value.len() <= MAX_LABEL_VALUE_LEN {
        return value;
    }
    let end = value
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= MAX_LABEL_VALUE_LEN)
        .last()
        .unwrap_or(0);
    &value[..end]
}
