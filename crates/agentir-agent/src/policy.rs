//! Policies: choosing the next action for a state.
//!
//! [`LlmPolicy`] is the main implementation. Selecting an action runs
//! through fixed stages:
//!
//! ```text
//! GATHER_CONTEXT ──> PROMPT ──> GENERATE ──> PARSE/RESOLVE
//!  thoughts,          render     completion   tiered fallback,
//!  experiences                                never fails
//! ```
//!
//! [`resolve_action`] turns any model reply into an [`Action`]. With at
//! least one available action the result is always one of them; with none
//! it is the invalid [`Action::no_op`] sentinel.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use agentir_store::{Experience, InformationState, MemoryStore, Payload, StateTransition, Thought};
use async_trait::async_trait;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};
use crate::llm::Completion;
use crate::observe::{AgentEvent, SharedSink, tracing_sink};
use crate::thought::{SharedThoughts, ThoughtGenerator};

/// Name of the sentinel action.
pub const NO_OP: &str = "no_op";

/// Most past experiences rendered into one prompt.
pub const MAX_PROMPT_EXPERIENCES: usize = 3;

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A proposed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub parameters: Payload,
    /// Rationale or provenance, not used for execution.
    #[serde(default)]
    pub description: Option<String>,
    /// `false` marks "no legal action could be determined".
    pub is_valid: bool,
    #[serde(default)]
    pub metadata: Payload,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Payload::new(),
            description: None,
            is_valid: true,
            metadata: Payload::new(),
        }
    }

    /// The invalid sentinel returned when a state offers no actions.
    pub fn no_op() -> Self {
        Self {
            is_valid: false,
            ..Self::new(NO_OP).with_description("No available actions")
        }
    }

    pub fn with_parameters(mut self, parameters: Payload) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Policy contract
// ---------------------------------------------------------------------------

/// Maps a state to an action and learns (or not) from the outcome.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn select_action(&self, state: &InformationState) -> Result<Action>;

    async fn update(
        &self,
        state: &InformationState,
        action: &Action,
        next_state: &InformationState,
        reward: f64,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Reply resolution
// ---------------------------------------------------------------------------

/// Which fallback stage produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseTier {
    /// Parsed JSON naming an available action.
    Structured,
    /// Parsed JSON naming an unknown action; the first available one was used.
    Substituted,
    /// No usable JSON; an action name appeared literally in the reply.
    LiteralMatch,
    /// Nothing matched; the first available action was used.
    Default,
    /// The state offers no actions; the sentinel was returned.
    NoActions,
}

impl ParseTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Substituted => "substituted",
            Self::LiteralMatch => "literal_match",
            Self::Default => "default",
            Self::NoActions => "no_actions",
        }
    }
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action together with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub action: Action,
    pub tier: ParseTier,
}

/// The JSON object spanning the first `{` to the last `}` of `reply`.
fn extract_json_object(reply: &str) -> Option<serde_json::Map<String, Value>> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "model reply contains malformed JSON");
            None
        }
    }
}

/// Resolve a raw model reply against the actions legal in a state.
pub fn resolve_action(reply: &str, available: &[String]) -> Resolution {
    if let Some(obj) = extract_json_object(reply) {
        let name = obj.get("action").and_then(Value::as_str).unwrap_or_default();
        let parameters = obj
            .get("parameters")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let reasoning = obj
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if available.iter().any(|a| a == name) {
            return Resolution {
                action: Action::new(name)
                    .with_parameters(parameters)
                    .with_description(reasoning),
                tier: ParseTier::Structured,
            };
        }

        if let Some(first) = available.first() {
            warn!(requested = %name, substitute = %first, "action not available, substituting");
            return Resolution {
                action: Action::new(first)
                    .with_parameters(parameters)
                    .with_description(
                        format!("Original action not available. {reasoning}").trim_end(),
                    )
                    .with_metadata("requested_action", Value::String(name.to_owned())),
                tier: ParseTier::Substituted,
            };
        }
    } else if let Some(name) = available.iter().find(|a| reply.contains(a.as_str())) {
        info!(action = %name, "action extracted from non-JSON reply");
        return Resolution {
            action: Action::new(name).with_description("Extracted from non-JSON response"),
            tier: ParseTier::LiteralMatch,
        };
    }

    match available.first() {
        Some(first) => {
            warn!(action = %first, "parsing failed, defaulting to first action");
            Resolution {
                action: Action::new(first)
                    .with_description("Default action selected due to parsing failure"),
                tier: ParseTier::Default,
            }
        }
        None => {
            warn!("no available actions");
            Resolution {
                action: Action::no_op(),
                tier: ParseTier::NoActions,
            }
        }
    }
}

/// `k: v, k: v` with strings unquoted.
pub fn format_params(params: &Payload) -> String {
    params
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{k}: {s}"),
            other => format!("{k}: {other}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render the action-selection prompt.
pub fn action_prompt(
    state: &InformationState,
    thoughts: &[Thought],
    experiences: &[Experience],
) -> String {
    let mut prompt = String::from(
        "You are an AI agent tasked with selecting the best action to take in the current situation.\n\n",
    );
    prompt.push_str(&format!("Current state: {}\n\n", state.text));

    if !state.available_actions.is_empty() {
        prompt.push_str("Available actions:\n");
        for action in &state.available_actions {
            prompt.push_str(&format!("- {action}\n"));
        }
        prompt.push('\n');
    }

    if !thoughts.is_empty() {
        prompt.push_str("Your thoughts on the current situation:\n");
        for thought in thoughts {
            prompt.push_str(&format!("[{}] {}\n\n", thought.kind, thought.text));
        }
    }

    if !experiences.is_empty() {
        prompt.push_str("Relevant past experiences:\n");
        for (i, exp) in experiences.iter().take(MAX_PROMPT_EXPERIENCES).enumerate() {
            let t = &exp.transition;
            prompt.push_str(&format!("Experience {}:\n", i + 1));
            prompt.push_str(&format!("State: {}\n", exp.state.text));
            prompt.push_str(&format!("Action taken: {}\n", t.action));
            if !t.action_params.is_empty() {
                let params = format_params(&t.action_params);
                prompt.push_str(&format!("Action parameters: {params}\n"));
            }
            prompt.push_str(&format!("Success: {}\n", t.success));
            prompt.push_str(&format!("Reward: {}\n\n", t.reward));
        }
    }

    prompt.push_str(
        "Based on the current state, your thoughts, and relevant past experiences, \
         select the best action to take.\n\
         Provide your response in the following JSON format:\n\
         {\n  \"action\": \"action_name\",\n  \
         \"parameters\": {\"param1\": \"value1\", \"param2\": \"value2\"},\n  \
         \"reasoning\": \"explanation of why this action was chosen\"\n}\n",
    );
    prompt
}

// ---------------------------------------------------------------------------
// LlmPolicy
// ---------------------------------------------------------------------------

/// Model-backed policy. Not learned: `update` at most records the
/// transition.
pub struct LlmPolicy {
    completion: Arc<dyn Completion>,
    memory: Option<Arc<dyn MemoryStore>>,
    thoughts: Option<(Arc<dyn ThoughtGenerator>, SharedThoughts)>,
    max_experiences: usize,
    record_transitions: bool,
    sink: SharedSink,
}

impl LlmPolicy {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self {
            completion,
            memory: None,
            thoughts: None,
            max_experiences: MAX_PROMPT_EXPERIENCES,
            record_transitions: false,
            sink: tracing_sink(),
        }
    }

    /// Read past experiences from `memory` when prompting.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Generate a reasoning chain before each selection and keep it in `store`.
    pub fn with_thoughts(
        mut self,
        generator: Arc<dyn ThoughtGenerator>,
        store: SharedThoughts,
    ) -> Self {
        self.thoughts = Some((generator, store));
        self
    }

    pub fn with_max_experiences(mut self, n: usize) -> Self {
        self.max_experiences = n;
        self
    }

    /// Write each `update` into the memory store as a transition.
    pub fn with_record_transitions(mut self, record: bool) -> Self {
        self.record_transitions = record;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    async fn gather_thoughts(&self, state: &InformationState) -> Vec<Thought> {
        let Some((generator, store)) = &self.thoughts else {
            return Vec::new();
        };
        match generator.generate_thoughts(state).await {
            Ok(thoughts) => {
                let mut store = store.lock().await;
                for thought in &thoughts {
                    store.add_thought(thought.clone());
                }
                thoughts
            }
            Err(e) => {
                warn!(error = %e, "thought generation failed, continuing without thoughts");
                Vec::new()
            }
        }
    }

    async fn gather_experiences(&self, state: &InformationState) -> Vec<Experience> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory
            .get_relevant_experiences(state, self.max_experiences)
            .await
        {
            Ok(experiences) => experiences,
            Err(e) => {
                warn!(error = %e, "experience lookup failed, continuing without experiences");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Policy for LlmPolicy {
    async fn select_action(&self, state: &InformationState) -> Result<Action> {
        let thoughts = self.gather_thoughts(state).await;
        let experiences = self.gather_experiences(state).await;

        let prompt = action_prompt(state, &thoughts, &experiences);
        let reply = self.completion.complete(&prompt).await;
        debug!(state_id = %state.id, reply_len = reply.len(), "policy reply received");

        let Resolution { action, tier } = resolve_action(&reply, &state.available_actions);
        if tier != ParseTier::Structured {
            self.sink.emit(AgentEvent::ParseFallback {
                state_id: state.id.clone(),
                tier,
                action: action.name.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(action)
    }

    async fn update(
        &self,
        state: &InformationState,
        action: &Action,
        next_state: &InformationState,
        reward: f64,
    ) -> Result<()> {
        if let (true, Some(memory)) = (self.record_transitions, &self.memory) {
            let transition = StateTransition::new(&state.id, &next_state.id, &action.name)
                .with_params(action.parameters.clone())
                .with_reward(reward);
            memory.add_transition(transition).await?;
            debug!(reward, "policy recorded transition");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RandomPolicy
// ---------------------------------------------------------------------------

/// Picks uniformly among the available actions.
pub struct RandomPolicy {
    rng: StdMutex<StdRng>,
}

impl Default for RandomPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomPolicy {
    pub fn new() -> Self {
        Self {
            rng: StdMutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible choices.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdMutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl Policy for RandomPolicy {
    async fn select_action(&self, state: &InformationState) -> Result<Action> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| AgentError::Internal(format!("rng mutex poisoned: {e}")))?;
        Ok(state
            .available_actions
            .choose(&mut *rng)
            .map(Action::new)
            .unwrap_or_else(Action::no_op))
    }

    async fn update(
        &self,
        _state: &InformationState,
        _action: &Action,
        _next_state: &InformationState,
        _reward: f64,
    ) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HybridPolicy
// ---------------------------------------------------------------------------

/// Smallest weight a sub-policy can decay to.
pub const MIN_POLICY_WEIGHT: f64 = 0.1;

/// Dispatches to named sub-policies.
pub struct HybridPolicy {
    policies: BTreeMap<String, Arc<dyn Policy>>,
    default_policy: String,
    update_weights: bool,
    weights: Mutex<HashMap<String, f64>>,
}

impl HybridPolicy {
    pub fn new(default_policy: impl Into<String>) -> Self {
        Self {
            policies: BTreeMap::new(),
            default_policy: default_policy.into(),
            update_weights: false,
            weights: Mutex::new(HashMap::new()),
        }
    }

    /// Register a sub-policy with weight 1.0.
    pub fn with_policy(mut self, name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        let name = name.into();
        self.weights.get_mut().insert(name.clone(), 1.0);
        self.policies.insert(name, policy);
        self
    }

    pub fn with_weight_updates(mut self, enabled: bool) -> Self {
        self.update_weights = enabled;
        self
    }

    pub async fn weights(&self) -> HashMap<String, f64> {
        self.weights.lock().await.clone()
    }

    /// Select with the named sub-policy, or the default one.
    pub async fn select_action_with(
        &self,
        state: &InformationState,
        policy_name: Option<&str>,
    ) -> Result<Action> {
        let name = policy_name.unwrap_or(&self.default_policy);
        let policy = self
            .policies
            .get(name)
            .ok_or_else(|| AgentError::UnknownPolicy {
                policy_name: name.to_owned(),
            })?;
        policy.select_action(state).await
    }

    async fn nudge_weights(
        &self,
        state: &InformationState,
        action: &Action,
        reward: f64,
    ) -> Result<()> {
        for (name, policy) in &self.policies {
            let hypothetical = policy.select_action(state).await?;
            let mut weights = self.weights.lock().await;
            let weight = weights.entry(name.clone()).or_insert(1.0);
            if hypothetical.name == action.name && reward > 0.0 {
                *weight *= 1.0 + 0.1 * reward;
            } else {
                *weight *= 1.0 - 0.05 * reward.abs();
            }
            *weight = weight.max(MIN_POLICY_WEIGHT);
            debug!(policy = %name, weight = *weight, "policy weight updated");
        }
        Ok(())
    }
}

#[async_trait]
impl Policy for HybridPolicy {
    async fn select_action(&self, state: &InformationState) -> Result<Action> {
        self.select_action_with(state, None).await
    }

    async fn update(
        &self,
        state: &InformationState,
        action: &Action,
        next_state: &InformationState,
        reward: f64,
    ) -> Result<()> {
        for policy in self.policies.values() {
            policy.update(state, action, next_state, reward).await?;
        }
        if self.update_weights {
            self.nudge_weights(state, action, reward).await?;
        }
        Ok(())
    }
}
