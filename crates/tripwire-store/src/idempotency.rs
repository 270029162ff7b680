//! Idempotency guard: remember completed fingerprints, replay their results.
//!
//! Records are written once per fingerprint and never overwritten. Expired
//! records are purged lazily when looked up, or eagerly by `purge_expired`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use tripwire_contracts::{
    error::TripwireResult,
    execution::IdempotencyRecord,
    identity::Fingerprint,
};
use tripwire_core::{
    clock::{elapsed_between, Clock},
    traits::IdempotencyStore,
};

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { store, ttl, clock }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn has_completed(&self, fingerprint: &Fingerprint) -> TripwireResult<bool> {
        Ok(self.get_result(fingerprint).await?.is_some())
    }

    /// The cached record for `fingerprint`, if one exists and has not expired.
    pub async fn get_result(
        &self,
        fingerprint: &Fingerprint,
    ) -> TripwireResult<Option<IdempotencyRecord>> {
        let Some(record) = self.store.get(fingerprint).await? else {
            return Ok(None);
        };
        if self.is_expired(&record) {
            debug!(action = %fingerprint, digest = %fingerprint.short(), "idempotency record expired");
            self.store.remove(fingerprint).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Record that `fingerprint` completed with `result_summary`.
    ///
    /// A second completion for the same fingerprint is a bug signal: it is
    /// logged and the original record is kept and returned.
    pub async fn record_completion(
        &self,
        fingerprint: &Fingerprint,
        result_summary: impl Into<String>,
    ) -> TripwireResult<IdempotencyRecord> {
        let record = IdempotencyRecord {
            fingerprint: fingerprint.clone(),
            result_summary: result_summary.into(),
            completed_at: self.clock.now(),
        };

        if self.store.put_if_absent(record.clone()).await? {
            debug!(action = %fingerprint, digest = %fingerprint.short(), "completion recorded");
            return Ok(record);
        }

        match self.store.get(fingerprint).await? {
            Some(existing) if !self.is_expired(&existing) => {
                warn!(
                    action = %fingerprint,
                    digest = %fingerprint.short(),
                    first_completed_at = %existing.completed_at,
                    "duplicate completion for fingerprint; keeping the original record"
                );
                Ok(existing)
            }
            // The blocking record expired (or vanished) in between: replace it.
            _ => {
                self.store.remove(fingerprint).await?;
                self.store.put_if_absent(record.clone()).await?;
                Ok(record)
            }
        }
    }

    /// Remove every expired record. Returns how many were removed.
    pub async fn purge_expired(&self) -> TripwireResult<usize> {
        let mut purged = 0;
        for record in self.store.list().await? {
            if self.is_expired(&record) {
                self.store.remove(&record.fingerprint).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "purged expired idempotency records");
        }
        Ok(purged)
    }

    fn is_expired(&self, record: &IdempotencyRecord) -> bool {
        elapsed_between(record.completed_at, self.clock.now()) >= self.ttl
    }
}
