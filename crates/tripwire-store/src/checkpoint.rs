//! Checkpoint manager: durable, strictly ordered workflow progress.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tripwire_contracts::{
    action::WorkflowId,
    error::{TripwireError, TripwireResult},
    execution::{Checkpoint, WorkflowResume},
};
use tripwire_core::{
    clock::{elapsed_between, Clock},
    traits::CheckpointStore,
};

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            retention,
            clock,
        }
    }

    /// Persist progress for `workflow_id` at `step_index`.
    ///
    /// Step indices are strictly increasing per workflow; a write that does
    /// not advance the stored index fails with `CheckpointOutOfOrder` and
    /// leaves the stored checkpoint untouched.
    pub async fn save(
        &self,
        workflow_id: &WorkflowId,
        step_index: u64,
        state: serde_json::Value,
    ) -> TripwireResult<Checkpoint> {
        let checkpoint = Checkpoint {
            workflow_id: workflow_id.clone(),
            step_index,
            serialized_state: state,
            timestamp: self.clock.now(),
        };

        match self.store.put_if_newer(checkpoint.clone()).await? {
            None => {
                debug!(workflow_id = %workflow_id, step_index, "checkpoint saved");
                Ok(checkpoint)
            }
            Some(last) => {
                warn!(
                    workflow_id = %workflow_id,
                    step_index,
                    last_step = last,
                    "out-of-order checkpoint rejected"
                );
                Err(TripwireError::CheckpointOutOfOrder {
                    workflow_id: workflow_id.to_string(),
                    last,
                    attempted: step_index,
                })
            }
        }
    }

    /// The latest checkpoint, unless it is older than the retention period
    /// (in which case it is deleted and treated as absent).
    pub async fn load(&self, workflow_id: &WorkflowId) -> TripwireResult<Option<Checkpoint>> {
        let Some(checkpoint) = self.store.get(workflow_id).await? else {
            return Ok(None);
        };
        if elapsed_between(checkpoint.timestamp, self.clock.now()) >= self.retention {
            info!(
                workflow_id = %workflow_id,
                step_index = checkpoint.step_index,
                "discarding checkpoint past retention"
            );
            self.store.delete(workflow_id).await?;
            return Ok(None);
        }
        Ok(Some(checkpoint))
    }

    /// Drop the checkpoint once the workflow reaches a terminal state.
    pub async fn clear(&self, workflow_id: &WorkflowId) -> TripwireResult<()> {
        self.store.delete(workflow_id).await?;
        debug!(workflow_id = %workflow_id, "checkpoint cleared");
        Ok(())
    }

    /// Where `workflow_id` should pick up: the step after its latest
    /// checkpoint, or step 0.
    pub async fn resume(&self, workflow_id: &WorkflowId) -> TripwireResult<WorkflowResume> {
        let checkpoint = self.load(workflow_id).await?;
        let next_step = checkpoint.as_ref().map_or(0, |c| c.step_index + 1);
        Ok(WorkflowResume {
            workflow_id: workflow_id.clone(),
            next_step,
            checkpoint,
        })
    }
}
