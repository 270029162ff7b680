//! Scenario 2: Flaky Dependency
//!
//! The orchestrator API fails `failure_threshold` times in a row, then
//! recovers. Status checks go through the orchestrator breaker.
//!
//! Stage walk-through:
//!   1. Each failure counts against the breaker; the last one opens it.
//!   2. While open, a check is rejected with `DependencyUnavailable` and the
//!      executor is not called.
//!   3. After the breaker timeout (a manual clock is advanced) the next check
//!      is the half-open trial.
//!   4. `success_threshold` successful trials close the breaker.
//!
//! Every check runs in its own workflow so the loop detector stays out of
//! the way.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tripwire_contracts::{
    action::{ActionKind, ExecutionReport, WorkflowId},
    circuit::CircuitStatus,
    error::{TripwireError, TripwireResult},
    execution::ActionOutcome,
};
use tripwire_core::{
    clock::{Clock, ManualClock},
    traits::ActionExecutor,
};

use super::SimulatedExecutor;
use crate::{config::TripwireConfig, Supervisor};

const DEPENDENCY: &str = "orchestrator";

#[derive(Debug, Clone)]
pub struct FlakySummary {
    /// Breaker status after each submission, in order.
    pub statuses: Vec<CircuitStatus>,
    pub executor_calls: usize,
    /// Submissions refused while the breaker was open.
    pub rejected: usize,
}

pub async fn run_scenario(config: &TripwireConfig) -> TripwireResult<FlakySummary> {
    let breaker = config.breaker.for_dependency(DEPENDENCY);
    let failures = breaker.failure_threshold as usize;

    println!("=== Scenario 2: Flaky Dependency ===");
    println!();
    println!(
        "  Dependency: {DEPENDENCY} (failure_threshold {}, success_threshold {}, timeout {}s)",
        breaker.failure_threshold, breaker.success_threshold, breaker.timeout_secs
    );
    println!("  Executor:   fails {failures} time(s), then recovers");
    println!();

    let executor = Arc::new(SimulatedExecutor::new(move |request, call| {
        if call < failures {
            Err(TripwireError::ActionFailed {
                action: format!("{}:{}", request.kind, request.target),
                reason: "orchestrator API returned 503".to_string(),
            })
        } else {
            Ok(ExecutionReport::converged("service healthy"))
        }
    }));
    let clock = Arc::new(ManualClock::starting_now());

    let executor_handle: Arc<dyn ActionExecutor> = executor.clone();
    let clock_handle: Arc<dyn Clock> = clock.clone();
    let supervisor = Supervisor::builder(config.clone(), executor_handle)
        .clock(clock_handle)
        .build()
        .await?;

    let mut statuses = Vec::new();
    let mut rejected = 0;
    let mut submission = 0usize;

    for _ in 0..failures {
        submission += 1;
        let (_, status) = check(&supervisor, submission, "failing").await;
        statuses.push(status);
    }

    submission += 1;
    let (result, status) = check(&supervisor, submission, "open").await;
    if matches!(result, Err(TripwireError::DependencyUnavailable { .. })) {
        rejected += 1;
    }
    statuses.push(status);

    clock.advance(Duration::from_secs(breaker.timeout_secs));
    println!("  ... {}s pass ...", breaker.timeout_secs);

    for _ in 0..breaker.success_threshold {
        submission += 1;
        let (_, status) = check(&supervisor, submission, "recovery").await;
        statuses.push(status);
    }

    println!();
    println!("  Executor calls:         {}", executor.calls());
    println!("  Rejected while open:    {rejected}");
    println!();
    println!("  Scenario 2 complete.");
    println!();

    Ok(FlakySummary {
        statuses,
        executor_calls: executor.calls(),
        rejected,
    })
}

/// Submit one status check in its own workflow and report the breaker
/// status right after it.
async fn check(
    supervisor: &Supervisor,
    n: usize,
    label: &str,
) -> (TripwireResult<ActionOutcome>, CircuitStatus) {
    let workflow = WorkflowId::new(format!("flaky-{n}"));
    let result = supervisor
        .submit_action(&workflow, ActionKind::CheckStatus, format!("svc-{n}"), json!({}))
        .await;
    let status = supervisor
        .get_circuit_states()
        .get(DEPENDENCY)
        .map(|s| s.status)
        .unwrap_or(CircuitStatus::Closed);
    let verdict = match &result {
        Ok(_) => "ok".to_string(),
        Err(e) => e.code().to_string(),
    };
    println!("  [{label:<9}] check {n:>2}: {verdict:<24} breaker {}", status.as_str());
    (result, status)
}
