//! Default escalation channel.

use async_trait::async_trait;
use tracing::error;

use tripwire_contracts::{error::TripwireResult, signal::HaltReport};
use tripwire_core::traits::EscalationChannel;

/// Writes every halt report to the log at `error` level.
///
/// Used when the host supplies no paging or chat integration.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEscalation;

#[async_trait]
impl EscalationChannel for LogEscalation {
    async fn escalate(&self, report: &HaltReport) -> TripwireResult<()> {
        let workflow_id = report
            .workflow_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        error!(
            code = report.code(),
            workflow_id = %workflow_id,
            threshold = %report.threshold.name,
            limit = report.threshold.limit,
            observed = report.threshold.observed,
            open_circuits = report
                .circuit_states
                .values()
                .filter(|s| s.status == tripwire_contracts::circuit::CircuitStatus::Open)
                .count(),
            "escalating to human: {}",
            report.explanation
        );
        Ok(())
    }
}
