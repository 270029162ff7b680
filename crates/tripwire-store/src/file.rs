//! File-backed persistence backend.
//!
//! Layout under the root directory:
//!
//!   idempotency/<digest>.json         one record per fingerprint
//!   checkpoints/<hex(workflow_id)>.json
//!   tmp/<uuid>.tmp                    staging area for atomic writes
//!
//! Every write goes to a fresh file under `tmp/` and is renamed into place,
//! so a reader sees either the old file or the new one, never a torn write.
//! Conditional writes (`put_if_absent`, `put_if_newer`) check and rename
//! under one async write lock; that makes them atomic for every handle that
//! shares this `FileStore`, not across processes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tripwire_contracts::{
    action::WorkflowId,
    error::{TripwireError, TripwireResult},
    execution::{Checkpoint, IdempotencyRecord},
    identity::Fingerprint,
};
use tripwire_core::traits::{CheckpointStore, IdempotencyStore};

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> TripwireResult<Self> {
        let root = root.into();
        for dir in ["idempotency", "checkpoints", "tmp"] {
            let path = root.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| io_error("create directory", &path, e))?;
        }
        debug!(root = %root.display(), "file store opened");
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn idempotency_path(&self, fingerprint: &Fingerprint) -> TripwireResult<PathBuf> {
        let digest = &fingerprint.digest;
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TripwireError::StoreError {
                reason: format!("fingerprint digest '{digest}' is not hex"),
            });
        }
        Ok(self.root.join("idempotency").join(format!("{digest}.json")))
    }

    fn checkpoint_path(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{}.json", hex::encode(workflow_id.as_str())))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> TripwireResult<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TripwireError::StoreError {
                    reason: format!("corrupt record '{}': {e}", path.display()),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", path, e)),
        }
    }

    /// Write `value` to `path` via a temporary file and a rename.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> TripwireResult<()> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| TripwireError::StoreError {
            reason: format!("failed to serialize record: {e}"),
        })?;
        let tmp = self
            .root
            .join("tmp")
            .join(format!("{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "failed to remove temp file");
            }
            return Err(io_error("rename", path, e));
        }
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> TripwireResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", path, e)),
        }
    }
}

// ── IdempotencyStore impl ─────────────────────────────────────────────────────

#[async_trait]
impl IdempotencyStore for FileStore {
    async fn get(&self, fingerprint: &Fingerprint) -> TripwireResult<Option<IdempotencyRecord>> {
        let path = self.idempotency_path(fingerprint)?;
        self.read_json(&path).await
    }

    async fn put_if_absent(&self, record: IdempotencyRecord) -> TripwireResult<bool> {
        let path = self.idempotency_path(&record.fingerprint)?;
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("stat", &path, e))?
        {
            return Ok(false);
        }
        self.write_json(&path, &record).await?;
        Ok(true)
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> TripwireResult<()> {
        let path = self.idempotency_path(fingerprint)?;
        let _guard = self.write_lock.lock().await;
        self.remove_file(&path).await
    }

    async fn list(&self) -> TripwireResult<Vec<IdempotencyRecord>> {
        let dir = self.root.join("idempotency");
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error("list", &dir, e))?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("list", &dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = self.read_json::<IdempotencyRecord>(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

// ── CheckpointStore impl ──────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for FileStore {
    async fn get(&self, workflow_id: &WorkflowId) -> TripwireResult<Option<Checkpoint>> {
        self.read_json(&self.checkpoint_path(workflow_id)).await
    }

    async fn put_if_newer(&self, checkpoint: Checkpoint) -> TripwireResult<Option<u64>> {
        let path = self.checkpoint_path(&checkpoint.workflow_id);
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read_json::<Checkpoint>(&path).await? {
            if checkpoint.step_index <= existing.step_index {
                return Ok(Some(existing.step_index));
            }
        }
        self.write_json(&path, &checkpoint).await?;
        Ok(None)
    }

    async fn delete(&self, workflow_id: &WorkflowId) -> TripwireResult<()> {
        let path = self.checkpoint_path(workflow_id);
        let _guard = self.write_lock.lock().await;
        self.remove_file(&path).await
    }
}

fn io_error(op: &str, path: &Path, e: std::io::Error) -> TripwireError {
    TripwireError::StoreError {
        reason: format!("failed to {op} '{}': {e}", path.display()),
    }
}
