//! Agent error types.
//!
//! All agent subsystems surface errors through [`AgentError`]. Only
//! precondition violations and unknown references are returned to callers;
//! malformed model output is resolved or defaulted where it is parsed, and
//! environment or tool failures are folded into the step outcome.

use agentir_store::StoreError;

/// Unified error type for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Preconditions -------------------------------------------------------
    /// A step or reflection was requested before any state was set.
    #[error("no current state set")]
    NoCurrentState,

    /// A trajectory did not have exactly one more state than transitions.
    #[error("expected {expected} states for the given transitions, got {actual}")]
    TrajectoryLengthMismatch { expected: usize, actual: usize },

    // -- Unknown references --------------------------------------------------
    /// A tool name that is not registered on the agent.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A sub-policy name that is not registered on a hybrid policy.
    #[error("unknown policy: {policy_name}")]
    UnknownPolicy { policy_name: String },

    // -- Execution -----------------------------------------------------------
    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// The environment rejected a reset or step.
    #[error("environment error: {reason}")]
    Environment { reason: String },

    /// An HTTP request to the completion endpoint failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    // -- Configuration -------------------------------------------------------
    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Upstream ------------------------------------------------------------
    /// An error propagated from the state store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Whether this error is a recoverable execution failure that a step
    /// folds into its outcome instead of propagating.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolExecutionFailed { .. } | Self::Environment { .. }
        )
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
