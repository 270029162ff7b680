//! Scenario 4: Multi-Agent Delegation
//!
//! Incident agents hand work to each other through an explicit call stack.
//!
//! Sub-cases:
//!   A. triage -> diagnose -> remediate -> triage: the second push of
//!      `triage` is a circular delegation and halts the workflow.
//!   B. A linear chain one agent longer than `max_call_depth` halts with
//!      `loop.delegation_depth`.

use std::sync::Arc;

use tripwire_contracts::{
    action::{AgentId, ExecutionReport, WorkflowId},
    error::{TripwireError, TripwireResult},
    signal::HaltReport,
};
use tripwire_core::traits::{ActionExecutor, EscalationChannel};

use super::{print_halt, RecordingEscalation, SimulatedExecutor};
use crate::{config::TripwireConfig, Supervisor};

pub const CIRCULAR_CHAIN: [&str; 4] = ["triage", "diagnose", "remediate", "triage"];

#[derive(Debug, Clone, Default)]
pub struct DelegationSummary {
    pub circular_halt: Option<HaltReport>,
    pub depth_halt: Option<HaltReport>,
    /// Depth reached before each halt.
    pub circular_depth: usize,
    pub chain_depth: usize,
    pub escalations: usize,
}

pub async fn run_scenario(config: &TripwireConfig) -> TripwireResult<DelegationSummary> {
    println!("=== Scenario 4: Multi-Agent Delegation ===");
    println!();

    let executor: Arc<dyn ActionExecutor> = Arc::new(SimulatedExecutor::new(|_, _| {
        Ok(ExecutionReport::converged("noop"))
    }));
    let escalation = RecordingEscalation::new();
    let escalation_handle: Arc<dyn EscalationChannel> = Arc::new(escalation.clone());
    let supervisor = Supervisor::builder(config.clone(), executor)
        .escalation(escalation_handle)
        .build()
        .await?;

    let mut summary = DelegationSummary::default();

    // ── Sub-case A: circular chain ───────────────────────────────────────────
    println!("  Sub-case A: {}", CIRCULAR_CHAIN.join(" -> "));
    let workflow = WorkflowId::new("incident-42");
    let mut stack = supervisor.new_call_stack();
    for agent in CIRCULAR_CHAIN {
        match supervisor
            .enter_delegate(&workflow, &mut stack, AgentId::new(agent))
            .await
        {
            Ok(depth) => println!("  Delegate to {agent:<10} depth {depth}"),
            Err(TripwireError::LoopDetected(report)) => {
                println!("  Delegate to {agent:<10} HALTED");
                print_halt(&report);
                summary.circular_halt = Some(*report);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    summary.circular_depth = stack.depth();
    println!();

    // ── Sub-case B: chain too deep ───────────────────────────────────────────
    let max_depth = config.loop_detector.max_call_depth;
    println!("  Sub-case B: linear chain of {} agents (max depth {max_depth})", max_depth + 1);
    let workflow = WorkflowId::new("incident-43");
    let mut stack = supervisor.new_call_stack();
    for n in 0..=max_depth {
        match supervisor
            .enter_delegate(&workflow, &mut stack, AgentId::new(format!("specialist-{n}")))
            .await
        {
            Ok(_) => {}
            Err(TripwireError::LoopDetected(report)) => {
                println!("  Delegate to specialist-{n}: HALTED at depth {}", stack.depth());
                print_halt(&report);
                summary.depth_halt = Some(*report);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    summary.chain_depth = stack.depth();
    while supervisor.exit_delegate(&mut stack).is_some() {}

    summary.escalations = escalation.reports().len();
    println!();
    println!("  Escalations sent:       {}", summary.escalations);
    println!();
    println!("  Scenario 4 complete.");
    println!();
    Ok(summary)
}
