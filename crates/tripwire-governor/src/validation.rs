//! Input-shape checks: size bound, repetition heuristic, relative deltas.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use tripwire_contracts::error::TripwireError;

/// The outcome of validating one payload or request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    TooLarge { size: usize, limit: usize },
    Suspicious { reason: String },
    Unauthorized { action: String },
    Malformed { reason: String },
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Short label used for rejection metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::TooLarge { .. } => "too_large",
            Self::Suspicious { .. } => "suspicious",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Malformed { .. } => "malformed",
        }
    }

    pub fn into_result(self) -> Result<(), TripwireError> {
        match self {
            Self::Valid => Ok(()),
            Self::TooLarge { size, limit } => Err(TripwireError::InputTooLarge { size, limit }),
            Self::Suspicious { reason } => Err(TripwireError::SuspiciousInput { reason }),
            Self::Unauthorized { action } => Err(TripwireError::UnauthorizedAction { action }),
            Self::Malformed { reason } => Err(TripwireError::MalformedAction { reason }),
        }
    }
}

/// Share of 4-byte windows in `payload` that repeat an earlier window.
///
/// Near 0.0 for ordinary text, near 1.0 for a short pattern repeated many
/// times.
pub fn repeated_ngram_share(payload: &[u8]) -> f64 {
    if payload.len() < 4 {
        return 0.0;
    }
    let windows = payload.len() - 3;
    let unique: HashSet<&[u8]> = payload.windows(4).collect();
    1.0 - unique.len() as f64 / windows as f64
}

const DELTA_KEYS: [&str; 4] = ["delta", "increment", "decrement", "by"];

/// Find a parameter that expresses a relative change instead of an absolute
/// desired state. Returns the offending key.
pub fn relative_delta_key(parameters: &serde_json::Value) -> Option<String> {
    let map = parameters.as_object()?;
    for (key, value) in map {
        if DELTA_KEYS.contains(&key.to_ascii_lowercase().as_str()) {
            return Some(key.clone());
        }
        if let Some(s) = value.as_str() {
            if is_signed_number(s) {
                return Some(key.clone());
            }
        }
    }
    None
}

/// `"+3"`, `"-1"`, `"+0.5"`: a sign followed by digits.
fn is_signed_number(s: &str) -> bool {
    let s = s.trim();
    let mut chars = s.chars();
    matches!(chars.next(), Some('+') | Some('-'))
        && chars.next().is_some_and(|c| c.is_ascii_digit())
        && s[1..].chars().all(|c| c.is_ascii_digit() || c == '.')
}
