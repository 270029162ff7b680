//! # tripwire-core
//!
//! Collaborator traits, the clock abstraction, and action fingerprinting for
//! the tripwire agent guard.
//!
//! This crate provides:
//! - The outbound traits (`ActionExecutor`, `IdempotencyStore`,
//!   `CheckpointStore`, `EscalationChannel`, `MetricsSink`, `HealthProbe`,
//!   `Remediation`)
//! - `Clock` with `SystemClock` and `ManualClock`
//! - The `Fingerprinter` every other component keys its state by
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tripwire_core::{Fingerprinter, traits::ActionExecutor};
//! ```

pub mod clock;
pub mod fingerprint;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fingerprint::{FingerprintConfig, Fingerprinter};
