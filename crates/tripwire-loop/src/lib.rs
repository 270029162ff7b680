//! # tripwire-loop
//!
//! Loop detection for the tripwire agent guard.
//!
//! [`LoopDetector`] keeps a bounded action history for one workflow and
//! answers three questions about it: is the same action recurring, has the
//! agent come back to a world state it already left, and has the workflow
//! used up its iteration budget. [`CallStack`] is the explicit delegation
//! chain used to catch agents calling each other in a circle.
//!
//! All checks are advisory. They return `Option<LoopSignal>` (or
//! `Result<_, LoopSignal>` for the call stack) and leave the halt decision to
//! the caller.

pub mod config;
pub mod detector;
pub mod stack;

pub use config::LoopDetectorConfig;
pub use detector::{LoopDetector, LoopStats};
pub use stack::CallStack;

// ── Tests ─────────────────────────────────────────────────────────────────────
