//! Agent loop for agentir.
//!
//! An [`Agent`] moves through a graph of [`InformationState`]s: a
//! [`Policy`] picks an [`Action`], an [`Environment`] (or the built-in
//! simulation over registered [`Tool`]s) produces the next state, a
//! [`RewardModel`] scores it, and every step lands in a [`MemoryStore`].
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  select   ┌──────────┐  complete  ┌────────────┐
//! │  Agent   │──────────>│  Policy  │───────────>│ Completion │
//! │  (loop)  │           │ (LLM,    │            │  (Ollama)  │
//! └────┬─────┘           │  random, │            └────────────┘
//!      │ step            │  hybrid) │
//!      v                 └──────────┘
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ Environment  │   │ RewardModel │   │ MemoryStore      │
//! │ or Tools     │   │             │   │ (agentir-store)  │
//! └──────────────┘   └─────────────┘   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`agent`] -- The agent loop, run results, reflection.
//! - [`policy`] -- Action selection and model-reply resolution.
//! - [`reward`] -- Rule-based and model-judged reward models.
//! - [`thought`] -- Chain-of-thought generation.
//! - [`tool`] -- Tool trait, schemas, argument validation.
//! - [`environment`] -- The external environment contract.
//! - [`llm`] -- Completion trait and the Ollama client.
//! - [`observe`] -- Structured agent events.
//! - [`config`] -- TOML configuration.
//! - [`error`] -- Agent error types.

pub mod agent;
pub mod config;
pub mod environment;
pub mod error;
pub mod llm;
pub mod observe;
pub mod policy;
pub mod reward;
pub mod thought;
pub mod tool;

pub use agent::{Agent, HistoryEntry, RunResult, StepOutcome, TerminalReason};
pub use agentir_store::{InformationState, MemoryStore, Payload, StateTransition, Thought};
pub use config::{
    AgentSettings, AgentirConfig, LlmConfig, MemoryBackend, MemoryConfig, ThoughtsConfig,
};
pub use environment::{EnvStep, Environment};
pub use error::{AgentError, Result};
pub use llm::{
    Completion, DEFAULT_SYSTEM_PROMPT, FnCompletion, OllamaClient, POLICY_SYSTEM_PROMPT,
    THOUGHT_SYSTEM_PROMPT,
};
pub use observe::{AgentEvent, EventSink, NoopSink, SharedSink, TracingSink, tracing_sink};
pub use policy::{
    Action, HybridPolicy, LlmPolicy, ParseTier, Policy, RandomPolicy, Resolution, action_prompt,
    resolve_action,
};
pub use reward::{
    LlmRewardModel, ReplyParser, RewardConfig, RewardEvent, RewardModel, RewardSubject,
    SimpleRewardModel,
};
pub use thought::{ChainOfThoughtGenerator, SharedThoughts, ThoughtGenerator, shared_thoughts};
pub use tool::{
    FnTool, ParamType, Tool, ToolOutput, ToolParameter, ToolSchema, parameters_schema,
    validate_args,
};
