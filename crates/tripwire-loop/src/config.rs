use serde::{Deserialize, Serialize};

use tripwire_contracts::error::{TripwireError, TripwireResult};

/// Loop detection limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Occurrences of one fingerprint in the trailing window that count as a loop.
    pub max_action_repetitions: u32,
    /// Actions a workflow may attempt before it is halted regardless of pattern.
    pub max_iterations: u64,
    /// Deepest delegation chain allowed on a call stack.
    pub max_call_depth: usize,
    /// Action history entries retained; older entries are evicted.
    pub history_window: usize,
    /// Only repetitions this recent count. Zero disables the time bound.
    pub repetition_window_secs: u64,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            max_action_repetitions: 3,
            max_iterations: 20,
            max_call_depth: 10,
            history_window: 30,
            repetition_window_secs: 60,
        }
    }
}

impl LoopDetectorConfig {
    pub fn validate(&self) -> TripwireResult<()> {
        if self.max_action_repetitions < 2 {
            return Err(TripwireError::ConfigError {
                reason: "max_action_repetitions must be at least 2".to_string(),
            });
        }
        if self.max_iterations == 0 || self.max_call_depth == 0 {
            return Err(TripwireError::ConfigError {
                reason: "max_iterations and max_call_depth must be at least 1".to_string(),
            });
        }
        if (self.history_window as u64) < u64::from(self.max_action_repetitions) {
            return Err(TripwireError::ConfigError {
                reason: format!(
                    "history_window ({}) is smaller than max_action_repetitions ({}); repetition could never fire",
                    self.history_window, self.max_action_repetitions
                ),
            });
        }
        Ok(())
    }
}
