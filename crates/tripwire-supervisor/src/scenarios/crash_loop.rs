//! Scenario 1: Crash Loop
//!
//! An agent keeps restarting a pod that stays in CrashLoopBackOff. Every
//! restart "succeeds" at the API level but nothing converges and the
//! executor reports no state change.
//!
//! Expected: the restart executes exactly `max_action_repetitions` times,
//! the last execution raises `loop.repetition`, the workflow is halted, and
//! any further submission is refused with `WorkflowHalted` without reaching
//! the executor.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use tripwire_contracts::{
    action::{ActionKind, ExecutionReport, WorkflowId},
    error::{TripwireError, TripwireResult},
    signal::HaltReport,
};
use tripwire_core::traits::{ActionExecutor, EscalationChannel, MetricsSink};

use super::{print_halt, RecordingEscalation, SimulatedExecutor};
use crate::{config::TripwireConfig, metrics::PrometheusMetrics, Supervisor};

pub const POD: &str = "checkout-7f9c";

#[derive(Debug, Clone)]
pub struct CrashLoopSummary {
    /// Times the executor actually ran the restart.
    pub executions: usize,
    pub halt: Option<HaltReport>,
    /// Whether a submission after the halt was refused.
    pub refused_after_halt: bool,
    pub escalations: usize,
}

pub async fn run_scenario(config: &TripwireConfig) -> TripwireResult<CrashLoopSummary> {
    println!("=== Scenario 1: Crash Loop ===");
    println!();
    println!("  Action:     restart {POD} (namespace shop)");
    println!("  Executor:   restart accepted, pod still in CrashLoopBackOff");
    println!(
        "  Threshold:  max_action_repetitions = {}",
        config.loop_detector.max_action_repetitions
    );
    println!();

    let executor = Arc::new(SimulatedExecutor::new(|_, _| {
        Ok(ExecutionReport::unresolved(
            "restart issued; pod still in CrashLoopBackOff",
        ))
    }));
    let escalation = RecordingEscalation::new();
    let metrics = Arc::new(PrometheusMetrics::new().map_err(|e| TripwireError::ConfigError {
        reason: e.to_string(),
    })?);

    let executor_handle: Arc<dyn ActionExecutor> = executor.clone();
    let escalation_handle: Arc<dyn EscalationChannel> = Arc::new(escalation.clone());
    let metrics_handle: Arc<dyn MetricsSink> = metrics.clone();
    let supervisor = Supervisor::builder(config.clone(), executor_handle)
        .escalation(escalation_handle)
        .metrics(metrics_handle)
        .build()
        .await?;

    let workflow = WorkflowId::new("crash-loop-demo");
    let attempts = u64::from(config.loop_detector.max_action_repetitions) + 1;
    let mut halt = None;

    for attempt in 1..=attempts {
        let result = supervisor
            .submit_action(
                &workflow,
                ActionKind::Restart,
                POD,
                json!({ "namespace": "shop" }),
            )
            .await;
        match result {
            Ok(outcome) => {
                println!(
                    "  Attempt {attempt}: executed, converged = false ({})",
                    outcome.result_summary().unwrap_or_default()
                );
            }
            Err(TripwireError::LoopDetected(report)) => {
                println!("  Attempt {attempt}: executed, then HALTED");
                println!();
                print_halt(&report);
                halt = Some(*report);
                break;
            }
            Err(e) => {
                warn!(error = %e, "unexpected crash-loop outcome");
                println!("  Attempt {attempt}: unexpected error: {e}");
                break;
            }
        }
    }

    let refused_after_halt = matches!(
        supervisor
            .submit_action(
                &workflow,
                ActionKind::Restart,
                POD,
                json!({ "namespace": "shop" }),
            )
            .await,
        Err(TripwireError::WorkflowHalted { .. })
    );

    println!();
    println!("  Executor calls:         {}", executor.calls());
    println!(
        "  Further attempts:       {}",
        if refused_after_halt { "refused (WorkflowHalted)" } else { "NOT refused" }
    );
    println!("  Escalations sent:       {}", escalation.reports().len());
    if let Ok(text) = metrics.encode_text() {
        for line in text.lines().filter(|l| l.starts_with("tripwire_loop_faults_total")) {
            println!("  Metric:                 {line}");
        }
    }
    println!();
    println!("  Scenario 1 complete.");
    println!();

    Ok(CrashLoopSummary {
        executions: executor.calls(),
        halt,
        refused_after_halt,
        escalations: escalation.reports().len(),
    })
}
