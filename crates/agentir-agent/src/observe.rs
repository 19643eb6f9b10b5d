//! Structured agent events.
//!
//! The agent and its policies report what they do through an injected
//! [`EventSink`]. Sinks observe; nothing in the agent reads them back, so a
//! [`NoopSink`] is always a valid choice.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::agent::TerminalReason;
use crate::policy::ParseTier;

/// An event emitted at a defined point of the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A state was written to the memory store.
    StateAdded {
        state_id: String,
        parent_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A transition was written to the memory store.
    TransitionAdded {
        source_state_id: String,
        target_state_id: String,
        action: String,
        success: bool,
        reward: f64,
        timestamp: DateTime<Utc>,
    },

    /// The policy chose an action for a state.
    ActionSelected {
        state_id: String,
        action: String,
        is_valid: bool,
        timestamp: DateTime<Utc>,
    },

    /// A model reply could not be used as-is and a fallback tier resolved it.
    ParseFallback {
        state_id: String,
        tier: ParseTier,
        action: String,
        timestamp: DateTime<Utc>,
    },

    /// A step failed, either folded into a failure state or aborting a run.
    StepFailed {
        state_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A multi-step run ended.
    RunFinished {
        steps: usize,
        success: bool,
        terminal_reason: TerminalReason,
        timestamp: DateTime<Utc>,
    },
}

/// Receiver of [`AgentEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn EventSink>;

/// Forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AgentEvent) {
        match event {
            AgentEvent::StateAdded {
                state_id,
                parent_id,
                ..
            } => debug!(%state_id, ?parent_id, "state added"),
            AgentEvent::TransitionAdded {
                source_state_id,
                target_state_id,
                action,
                success,
                reward,
                ..
            } => debug!(
                source = %source_state_id,
                target = %target_state_id,
                %action,
                success,
                reward,
                "transition added"
            ),
            AgentEvent::ActionSelected {
                state_id,
                action,
                is_valid,
                ..
            } => info!(%state_id, %action, is_valid, "action selected"),
            AgentEvent::ParseFallback {
                state_id,
                tier,
                action,
                ..
            } => warn!(%state_id, %tier, %action, "model reply resolved by fallback"),
            AgentEvent::StepFailed {
                state_id, reason, ..
            } => warn!(%state_id, %reason, "step failed"),
            AgentEvent::RunFinished {
                steps,
                success,
                terminal_reason,
                ..
            } => info!(steps, success, reason = %terminal_reason, "run finished"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// The default sink.
pub fn tracing_sink() -> SharedSink {
    Arc::new(TracingSink)
}
