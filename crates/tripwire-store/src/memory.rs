//! In-memory persistence backend.
//!
//! `MemoryStore` implements both `IdempotencyStore` and `CheckpointStore`
//! over maps behind one `Mutex`. Conditional writes check and insert under
//! the same lock, so they are atomic. Cloning shares the same state, which
//! lets a test keep a handle on what the supervisor wrote.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use tripwire_contracts::{
    action::WorkflowId,
    error::TripwireResult,
    execution::{Checkpoint, IdempotencyRecord},
    identity::Fingerprint,
};
use tripwire_core::traits::{CheckpointStore, IdempotencyStore};

// ── Internal mutable state ────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    /// Keyed by fingerprint digest.
    idempotency: HashMap<String, IdempotencyRecord>,
    checkpoints: HashMap<WorkflowId, Checkpoint>,
}

// ── Public store ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of idempotency records currently held.
    pub fn completion_count(&self) -> usize {
        self.lock().idempotency.len()
    }

    /// Every write completes under the lock, so a poisoned state is still
    /// consistent.
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── IdempotencyStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl IdempotencyStore for MemoryStore {
    async fn get(&self, fingerprint: &Fingerprint) -> TripwireResult<Option<IdempotencyRecord>> {
        Ok(self.lock().idempotency.get(&fingerprint.digest).cloned())
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> TripwireResult<bool> {
        let mut state = self.lock();
        if state.idempotency.contains_key(&record.fingerprint.digest) {
            return Ok(false);
        }
        state
            .idempotency
            .insert(record.fingerprint.digest.clone(), record);
        Ok(true)
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> TripwireResult<()> {
        self.lock().idempotency.remove(&fingerprint.digest);
        Ok(())
    }

    async fn list(&self) -> TripwireResult<Vec<IdempotencyRecord>> {
        Ok(self.lock().idempotency.values().cloned().collect())
    }
}

// ── CheckpointStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get(&self, workflow_id: &WorkflowId) -> TripwireResult<Option<Checkpoint>> {
        Ok(self.lock().checkpoints.get(workflow_id).cloned())
    }

    async fn put_if_newer(&self, checkpoint: Checkpoint) -> TripwireResult<Option<u64>> {
        let mut state = self.lock();
        if let Some(existing) = state.checkpoints.get(&checkpoint.workflow_id) {
            if checkpoint.step_index <= existing.step_index {
                return Ok(Some(existing.step_index));
            }
        }
        state
            .checkpoints
            .insert(checkpoint.workflow_id.clone(), checkpoint);
        Ok(None)
    }

    async fn delete(&self, workflow_id: &WorkflowId) -> TripwireResult<()> {
        self.lock().checkpoints.remove(workflow_id);
        Ok(())
    }
}
