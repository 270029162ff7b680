//! Fingerprint identity types.
//!
//! Two distinct digests flow through the guard: an action fingerprint names
//! an intended operation, a state fingerprint names an observed outcome.
//! They are separate types so one can never be compared against the other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deterministic identity of an action: SHA-256 over kind, normalized
/// target, and canonical non-volatile parameters.
///
/// `label` is the human-facing `kind:target` form used in halt explanations
/// (e.g. `restart:checkout-7f9c`). It is a pure function of fields already
/// covered by `digest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Lowercase 64-character hex SHA-256 digest.
    pub digest: String,
    pub label: String,
}

impl Fingerprint {
    /// Short digest prefix for log lines.
    pub fn short(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Deterministic identity of an observed world-state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFingerprint(pub String);

impl fmt::Display for StateFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}
