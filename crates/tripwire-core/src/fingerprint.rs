//! Action and state fingerprinting.
//!
//! A fingerprint is SHA-256 over a deterministic byte layout:
//!
//!   1. action kind, lowercase UTF-8
//!   2. a 0x00 separator
//!   3. normalized target (trimmed, whitespace collapsed, lowercase)
//!   4. a 0x00 separator
//!   5. canonical JSON of the parameters: object keys sorted at every depth,
//!      no insignificant whitespace, volatile top-level keys removed
//!
//! Attempt counters and volatile fields never reach the hasher, so retries
//! of the same logical action share one fingerprint. Oversized or overly
//! nested parameters are rejected rather than truncated: hashing a prefix
//! would let two different actions collide.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tripwire_contracts::{
    action::ActionRequest,
    error::{TripwireError, TripwireResult},
    identity::{Fingerprint, StateFingerprint},
};

/// Bounds and volatile-key defaults for fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Largest canonical parameter encoding accepted, in bytes.
    pub max_parameter_bytes: usize,
    /// Deepest array/object nesting accepted.
    pub max_parameter_depth: usize,
    /// Top-level parameter keys that are always excluded from identity.
    pub volatile_keys: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            max_parameter_bytes: 64 * 1024,
            max_parameter_depth: 16,
            volatile_keys: vec![
                "timestamp".to_string(),
                "request_id".to_string(),
                "attempt".to_string(),
                "trace_id".to_string(),
            ],
        }
    }
}

/// Pure, deterministic fingerprinter.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    config: FingerprintConfig,
}

impl Fingerprinter {
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    /// Compute the identity of `request`.
    ///
    /// # Errors
    ///
    /// `MalformedAction` if the target is blank, the parameters are not an
    /// object (or null), or the parameters exceed the size/depth bounds.
    pub fn fingerprint(&self, request: &ActionRequest) -> TripwireResult<Fingerprint> {
        let target = normalize_target(&request.target);
        if target.is_empty() {
            return Err(TripwireError::MalformedAction {
                reason: "action target is empty".to_string(),
            });
        }

        let parameters = match &request.parameters {
            serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
            serde_json::Value::Object(map) => {
                let kept = map
                    .iter()
                    .filter(|(key, _)| !self.is_volatile(key, &request.volatile))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                serde_json::Value::Object(kept)
            }
            other => {
                return Err(TripwireError::MalformedAction {
                    reason: format!(
                        "parameters must be a JSON object, got {}",
                        json_type_name(other)
                    ),
                });
            }
        };

        let canonical = self.canonicalize(&parameters)?;
        let kind = request.kind.as_str().to_ascii_lowercase();

        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(target.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());

        Ok(Fingerprint {
            digest: hex::encode(hasher.finalize()),
            label: format!("{kind}:{target}"),
        })
    }

    /// Compute the identity of an observed world-state snapshot.
    pub fn fingerprint_state(&self, state: &serde_json::Value) -> TripwireResult<StateFingerprint> {
        let canonical = self.canonicalize(state)?;
        Ok(StateFingerprint(hex::encode(Sha256::digest(canonical.as_bytes()))))
    }

    /// Canonical JSON encoding of `value` within the configured bounds.
    pub fn canonicalize(&self, value: &serde_json::Value) -> TripwireResult<String> {
        let mut out = String::new();
        write_canonical(value, 0, &self.config, &mut out)
            .map_err(|reason| TripwireError::MalformedAction { reason })?;
        Ok(out)
    }

    fn is_volatile(&self, key: &str, marked: &BTreeSet<String>) -> bool {
        marked.contains(key) || self.config.volatile_keys.iter().any(|k| k == key)
    }
}

/// Trim, collapse runs of whitespace to one space, and lowercase.
pub fn normalize_target(target: &str) -> String {
    target
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn write_canonical(
    value: &serde_json::Value,
    depth: usize,
    config: &FingerprintConfig,
    out: &mut String,
) -> Result<(), String> {
    if depth > config.max_parameter_depth {
        return Err(format!(
            "parameters nest deeper than {} levels",
            config.max_parameter_depth
        ));
    }

    match value {
        serde_json::Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, config, out)?;
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&encode_scalar(&serde_json::Value::String(key.clone()))?);
                out.push(':');
                write_canonical(&map[key.as_str()], depth + 1, config, out)?;
            }
            out.push('}');
        }
        scalar => out.push_str(&encode_scalar(scalar)?),
    }

    if out.len() > config.max_parameter_bytes {
        return Err(format!(
            "parameters exceed {} bytes when canonicalized",
            config.max_parameter_bytes
        ));
    }
    Ok(())
}

fn encode_scalar(value: &serde_json::Value) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("parameter is not serializable: {e}"))
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
