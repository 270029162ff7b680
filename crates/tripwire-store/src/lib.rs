//! # tripwire-store
//!
//! Durable state for the tripwire agent guard.
//!
//! - [`IdempotencyGuard`] remembers which fingerprints completed and replays
//!   their cached result instead of running them again.
//! - [`CheckpointManager`] keeps one strictly ordered checkpoint per
//!   workflow so a restarted workflow resumes after its last durable step.
//! - [`MemoryStore`] and [`FileStore`] are the two persistence backends; both
//!   implement the `IdempotencyStore` and `CheckpointStore` traits from
//!   `tripwire-core`.

pub mod checkpoint;
pub mod config;
pub mod file;
pub mod idempotency;
pub mod memory;

pub use checkpoint::CheckpointManager;
pub use config::StoreConfig;
pub use file::FileStore;
pub use idempotency::IdempotencyGuard;
pub use memory::MemoryStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
