use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Retention and backend selection for idempotency records and checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Seconds an idempotency record stays valid after completion.
    pub idempotency_ttl_secs: u64,
    /// Seconds after which an unfinished workflow's checkpoint is discarded.
    pub checkpoint_retention_secs: u64,
    /// Directory for the file-backed store. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_secs: 86_400,
            checkpoint_retention_secs: 604_800,
            data_dir: None,
        }
    }
}
