//! Explicit delegation call stack.
//!
//! Cooperating agents pass a `CallStack` value down the delegation chain
//! instead of relying on ambient state, so cycle detection is a pure
//! function of the frames pushed so far.

use tripwire_contracts::{
    action::AgentId,
    signal::{LoopReason, LoopSignal},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<AgentId>,
    max_depth: usize,
}

impl CallStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    /// Push `agent` onto the stack and return the new depth.
    ///
    /// Fails with a `CircularDelegation` signal if `agent` is already on the
    /// stack, or a `DelegationDepth` signal if the stack is already at its
    /// maximum depth. The stack is unchanged on failure.
    pub fn push_frame(&mut self, agent: AgentId) -> Result<usize, LoopSignal> {
        if self.frames.contains(&agent) {
            let chain = self
                .frames
                .iter()
                .chain(std::iter::once(&agent))
                .map(|a| a.0.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(LoopSignal {
                reason: LoopReason::CircularDelegation,
                subject: agent.0.clone(),
                count: self.frames.len() as u64 + 1,
                limit: self.max_depth as u64,
                explanation: format!("circular delegation: {chain}"),
            });
        }
        if self.frames.len() >= self.max_depth {
            return Err(LoopSignal {
                reason: LoopReason::DelegationDepth,
                subject: agent.0.clone(),
                count: self.frames.len() as u64 + 1,
                limit: self.max_depth as u64,
                explanation: format!(
                    "delegation to {agent} would exceed max call depth {}",
                    self.max_depth
                ),
            });
        }
        self.frames.push(agent);
        Ok(self.frames.len())
    }

    pub fn pop_frame(&mut self) -> Option<AgentId> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[AgentId] {
        &self.frames
    }

    /// Discard every frame, e.g. when the top-level action completes.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
