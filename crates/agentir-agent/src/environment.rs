//! The world an agent acts in.

use agentir_store::{InformationState, Payload};
use async_trait::async_trait;

use crate::error::Result;
use crate::policy::Action;

/// Outcome of applying one action to an [`Environment`].
#[derive(Debug, Clone)]
pub struct EnvStep {
    pub next_state: InformationState,
    pub reward: f64,
    /// The episode is over.
    pub done: bool,
    pub info: Payload,
}

impl EnvStep {
    pub fn new(next_state: InformationState, reward: f64) -> Self {
        Self {
            next_state,
            reward,
            done: false,
            info: Payload::new(),
        }
    }

    pub fn done(mut self) -> Self {
        self.done = true;
        self
    }
}

/// An external environment. Returning `Err` from `step` (typically
/// [`AgentError::Environment`](crate::AgentError::Environment)) is treated as
/// a failed action, not as a run-level failure.
#[async_trait]
pub trait Environment: Send {
    async fn reset(&mut self) -> Result<InformationState>;

    async fn step(&mut self, action: &Action) -> Result<EnvStep>;
}
