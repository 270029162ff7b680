//! Reference scenarios.
//!
//! Each scenario wires a real [`Supervisor`](crate::Supervisor) to a
//! simulated executor and walks one failure pattern through the guard,
//! printing every decision the pipeline makes:
//!
//! 1. **Crash loop**: a restart that never converges is halted after
//!    `max_action_repetitions` executions.
//! 2. **Flaky dependency**: the orchestrator breaker opens, rejects, admits
//!    one trial after its timeout, and closes again.
//! 3. **Budget**: the request cap rejects a burst until the window rolls
//!    over; flooded and unauthorized requests never reach the executor.
//! 4. **Delegation**: agents calling each other in a circle, and a chain
//!    deeper than `max_call_depth`.
//!
//! The simulated collaborators here are also what the crate's own tests
//! drive the supervisor with.

pub mod budget;
pub mod crash_loop;
pub mod delegation;
pub mod flaky_dependency;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tripwire_contracts::{
    action::{ActionRequest, ExecutionReport},
    error::TripwireResult,
    signal::HaltReport,
};
use tripwire_core::traits::{ActionExecutor, EscalationChannel};

use crate::config::TripwireConfig;

// ── Simulated executor ────────────────────────────────────────────────────────

/// An executor whose behaviour is a closure of the request and the 0-based
/// call number. Every request it receives is kept for inspection.
pub struct SimulatedExecutor<F> {
    behaviour: F,
    calls: AtomicUsize,
    requests: Mutex<Vec<ActionRequest>>,
}

impl<F> SimulatedExecutor<F>
where
    F: Fn(&ActionRequest, usize) -> TripwireResult<ExecutionReport> + Send + Sync + 'static,
{
    pub fn new(behaviour: F) -> Self {
        Self {
            behaviour,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// How many times `execute` ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl<F> ActionExecutor for SimulatedExecutor<F>
where
    F: Fn(&ActionRequest, usize) -> TripwireResult<ExecutionReport> + Send + Sync + 'static,
{
    async fn execute(&self, request: &ActionRequest) -> TripwireResult<ExecutionReport> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        (self.behaviour)(request, call)
    }
}

// ── Recording escalation ──────────────────────────────────────────────────────

/// Keeps every halt report it receives.
#[derive(Debug, Default, Clone)]
pub struct RecordingEscalation {
    reports: Arc<Mutex<Vec<HaltReport>>>,
}

impl RecordingEscalation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<HaltReport> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reason codes of every report received, in order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| r.code())
            .collect()
    }
}

#[async_trait]
impl EscalationChannel for RecordingEscalation {
    async fn escalate(&self, report: &HaltReport) -> TripwireResult<()> {
        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
        Ok(())
    }
}

// ── Run all ───────────────────────────────────────────────────────────────────

/// Run every scenario in order against `config`.
pub async fn run_all(config: &TripwireConfig) -> TripwireResult<()> {
    crash_loop::run_scenario(config).await?;
    flaky_dependency::run_scenario(config).await?;
    budget::run_scenario(config).await?;
    delegation::run_scenario(config).await?;
    Ok(())
}

fn print_halt(report: &HaltReport) {
    println!("  Halt code:              {}", report.code());
    println!("  Explanation:            {}", report.explanation);
    println!(
        "  Threshold:              {} (limit {}, observed {})",
        report.threshold.name, report.threshold.limit, report.threshold.observed
    );
    println!("  History attached:       {} record(s)", report.recent_history.len());
}
