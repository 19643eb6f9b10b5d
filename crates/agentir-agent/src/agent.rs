//! The agent loop.
//!
//! One step of [`Agent::act`]:
//!
//! ```text
//! current_state ──> policy.select_action ──> environment.step
//!                                        └─> (or) built-in simulation:
//!                                              tool call / pass-through
//!      ──> memory: state + transition ──> history ──> policy.update
//! ```
//!
//! [`Agent::run`] repeats steps until the environment reports completion,
//! the target state is reached, or the step budget runs out. A failing step
//! ends the run with [`TerminalReason::StepFailed`] instead of propagating.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use agentir_store::{
    InMemoryStore, InformationState, MemoryStore, Payload, SharedSimilarity, StateTransition,
    default_similarity,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{AgentSettings, AgentirConfig};
use crate::environment::{EnvStep, Environment};
use crate::error::{AgentError, Result};
use crate::observe::{AgentEvent, SharedSink, tracing_sink};
use crate::policy::{Action, Policy, format_params};
use crate::reward::RewardModel;
use crate::thought::{SharedThoughts, ThoughtGenerator, shared_thoughts};
use crate::tool::{Tool, ToolOutput, ToolSchema};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One `(state, action, next_state, reward)` record of local history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub state: InformationState,
    pub action: Action,
    pub next_state: InformationState,
    pub reward: f64,
}

/// Result of a single [`Agent::act`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub action: Action,
    pub next_state: InformationState,
    pub reward: f64,
    pub done: bool,
    pub info: Payload,
    /// `false` when the environment or tool failed.
    pub success: bool,
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    EnvironmentDone,
    TargetReached,
    MaxStepsReached,
    StepFailed(String),
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvironmentDone => f.write_str("environment done"),
            Self::TargetReached => f.write_str("target reached"),
            Self::MaxStepsReached => f.write_str("max steps reached"),
            Self::StepFailed(reason) => write!(f, "step failed: {reason}"),
        }
    }
}

/// Result of [`Agent::run`].
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The initial state followed by every reached state.
    pub states: Vec<InformationState>,
    pub actions: Vec<Action>,
    pub rewards: Vec<f64>,
    /// A stop condition was reached.
    pub success: bool,
    /// The environment reported completion.
    pub done: bool,
    pub final_state: InformationState,
    pub terminal_reason: TerminalReason,
}

impl RunResult {
    pub fn steps(&self) -> usize {
        self.actions.len()
    }

    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }
}

/// What executing an action produced, before bookkeeping.
struct Executed {
    step: EnvStep,
    success: bool,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    name: String,
    policy: Arc<dyn Policy>,
    memory: Arc<dyn MemoryStore>,
    thought_generator: Option<Arc<dyn ThoughtGenerator>>,
    thoughts: SharedThoughts,
    tools: BTreeMap<String, Arc<dyn Tool>>,
    reward_model: Option<Arc<dyn RewardModel>>,
    sink: SharedSink,
    similarity: SharedSimilarity,
    settings: AgentSettings,
    current_state: Option<InformationState>,
    target_state: Option<InformationState>,
    history: Vec<HistoryEntry>,
}

impl Agent {
    /// An agent with an in-memory store, no tools and no reward model.
    pub fn new(name: impl Into<String>, policy: Arc<dyn Policy>) -> Self {
        Self {
            name: name.into(),
            policy,
            memory: Arc::new(InMemoryStore::new()),
            thought_generator: None,
            thoughts: shared_thoughts(),
            tools: BTreeMap::new(),
            reward_model: None,
            sink: tracing_sink(),
            similarity: default_similarity(),
            settings: AgentSettings::default(),
            current_state: None,
            target_state: None,
            history: Vec::new(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.add_tool(tool);
        self
    }

    pub fn with_reward_model(mut self, reward_model: Arc<dyn RewardModel>) -> Self {
        self.reward_model = Some(reward_model);
        self
    }

    /// Share a thought store, e.g. with the policy.
    pub fn with_thought_store(mut self, thoughts: SharedThoughts) -> Self {
        self.thoughts = thoughts;
        self
    }

    pub fn with_thought_generator(mut self, generator: Arc<dyn ThoughtGenerator>) -> Self {
        self.thought_generator = Some(generator);
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Take the `[agent]` section of `config`.
    pub fn with_config(mut self, config: &AgentirConfig) -> Self {
        self.settings = config.agent.clone();
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Measure used for the target-reached check.
    pub fn with_similarity(mut self, similarity: SharedSimilarity) -> Self {
        self.similarity = similarity;
        self
    }

    // -- Accessors -----------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    pub fn thoughts(&self) -> &SharedThoughts {
        &self.thoughts
    }

    pub fn current_state(&self) -> Option<&InformationState> {
        self.current_state.as_ref()
    }

    pub fn target_state(&self) -> Option<&InformationState> {
        self.target_state.as_ref()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    // -- State ---------------------------------------------------------------

    /// Make `state` current and record it in memory.
    pub async fn set_current_state(&mut self, state: InformationState) -> Result<()> {
        self.record_state(&state).await?;
        self.current_state = Some(state);
        Ok(())
    }

    /// The state runs try to reach; also recorded in memory.
    pub async fn set_target_state(&mut self, state: InformationState) -> Result<()> {
        self.record_state(&state).await?;
        self.target_state = Some(state);
        Ok(())
    }

    async fn record_state(&self, state: &InformationState) -> Result<()> {
        self.memory.add_state(state.clone()).await?;
        self.sink.emit(AgentEvent::StateAdded {
            state_id: state.id.clone(),
            parent_id: state.parent_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    // -- Tools ---------------------------------------------------------------

    /// Register `tool` under its own name, replacing any previous one.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    pub async fn call_tool(&self, name: &str, args: Payload) -> Result<ToolOutput> {
        let tool = self.tools.get(name).ok_or_else(|| AgentError::UnknownTool {
            tool_name: name.to_owned(),
        })?;
        tool.call(args).await
    }

    // -- Stepping ------------------------------------------------------------

    /// Select an action for the current state, execute it, and record the
    /// outcome.
    #[instrument(skip_all, fields(agent = %self.name))]
    pub async fn act(&mut self, env: Option<&mut (dyn Environment + '_)>) -> Result<StepOutcome> {
        let state = self
            .current_state
            .clone()
            .ok_or(AgentError::NoCurrentState)?;

        let action = self.policy.select_action(&state).await?;
        self.sink.emit(AgentEvent::ActionSelected {
            state_id: state.id.clone(),
            action: action.name.clone(),
            is_valid: action.is_valid,
            timestamp: Utc::now(),
        });

        let executed = match env {
            Some(env) => env.step(&action).await.map(|step| Executed {
                step,
                success: true,
            }),
            None => self.simulate(&state, &action).await,
        };
        let Executed { step, success } = match executed {
            Ok(executed) => executed,
            Err(e) if e.is_execution_failure() => self.failure_step(&state, &action, &e),
            Err(e) => return Err(e),
        };
        let EnvStep {
            next_state,
            mut reward,
            done,
            info,
        } = step;
        if !success {
            reward -= self.settings.failure_penalty;
        }

        self.set_current_state(next_state.clone()).await?;
        let transition = StateTransition::new(&state.id, &next_state.id, &action.name)
            .with_params(action.parameters.clone())
            .with_success(success)
            .with_reward(reward);
        self.memory.add_transition(transition).await?;
        self.sink.emit(AgentEvent::TransitionAdded {
            source_state_id: state.id.clone(),
            target_state_id: next_state.id.clone(),
            action: action.name.clone(),
            success,
            reward,
            timestamp: Utc::now(),
        });

        self.history.push(HistoryEntry {
            state: state.clone(),
            action: action.clone(),
            next_state: next_state.clone(),
            reward,
        });
        self.policy
            .update(&state, &action, &next_state, reward)
            .await?;

        Ok(StepOutcome {
            action,
            next_state,
            reward,
            done,
            info,
            success,
        })
    }

    /// Execute `action` without an environment.
    async fn simulate(&self, state: &InformationState, action: &Action) -> Result<Executed> {
        let (next_state, success) = match self.tools.get(&action.name) {
            Some(tool) => {
                let output = tool.call(action.parameters.clone()).await.map_err(|e| {
                    AgentError::ToolExecutionFailed {
                        tool_name: action.name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let rendered = if output.success {
                    match output.result.get("result") {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => format_params(&output.result),
                    }
                } else {
                    format!("Error: {}", output.error.as_deref().unwrap_or("unknown error"))
                };
                let next = state
                    .derive(format!("Result of {}: {rendered}", action.name))
                    .with_data("tool_result", serde_json::to_value(&output)?);
                (next, output.success)
            }
            None => (
                state.derive(format!("After {}: {}", action.name, state.text)),
                true,
            ),
        };

        let reward = match (&self.reward_model, &self.target_state) {
            (Some(model), Some(target)) => {
                model.calculate_reward(&next_state, target, None).await.value
            }
            _ => 0.0,
        };

        Ok(Executed {
            step: EnvStep::new(next_state, reward),
            success,
        })
    }

    fn failure_step(
        &self,
        state: &InformationState,
        action: &Action,
        error: &AgentError,
    ) -> Executed {
        let reason = error.to_string();
        warn!(action = %action.name, %reason, "action failed");
        self.sink.emit(AgentEvent::StepFailed {
            state_id: state.id.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });

        let mut step = EnvStep::new(
            state
                .derive(format!("Action {} failed: {reason}", action.name))
                .with_data("error", Value::String(reason.clone())),
            0.0,
        );
        step.info.insert("error".into(), Value::String(reason));
        Executed {
            step,
            success: false,
        }
    }

    /// Step repeatedly. `max_steps` defaults to the configured bound. With
    /// `reset` and an environment, the run starts from `env.reset()`;
    /// otherwise from the current state.
    #[instrument(skip_all, fields(agent = %self.name))]
    pub async fn run(
        &mut self,
        mut env: Option<&mut (dyn Environment + '_)>,
        max_steps: Option<usize>,
        reset: bool,
    ) -> Result<RunResult> {
        let initial = match env.as_deref_mut() {
            Some(env) if reset => {
                let state = env.reset().await?;
                self.set_current_state(state.clone()).await?;
                state
            }
            _ => self
                .current_state
                .clone()
                .ok_or(AgentError::NoCurrentState)?,
        };

        let max_steps = max_steps.unwrap_or(self.settings.max_steps);
        let mut states = vec![initial];
        let mut actions = Vec::new();
        let mut rewards = Vec::new();
        let mut done = false;
        let mut terminal_reason = TerminalReason::MaxStepsReached;

        for step in 0..max_steps {
            let outcome = match self.act(env.as_deref_mut()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(step, error = %e, "run aborted");
                    self.sink.emit(AgentEvent::StepFailed {
                        state_id: states.last().map(|s| s.id.clone()).unwrap_or_default(),
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    terminal_reason = TerminalReason::StepFailed(e.to_string());
                    break;
                }
            };

            let reached = self.target_state.as_ref().map(|target| {
                outcome
                    .next_state
                    .compare(target, Some(self.similarity.as_ref()))
            });
            states.push(outcome.next_state);
            actions.push(outcome.action);
            rewards.push(outcome.reward);

            if outcome.done {
                done = true;
                terminal_reason = TerminalReason::EnvironmentDone;
                break;
            }
            if let Some(similarity) = reached.filter(|s| *s > self.settings.success_threshold) {
                debug!(similarity, "target state reached");
                terminal_reason = TerminalReason::TargetReached;
                break;
            }
        }

        let success = matches!(
            terminal_reason,
            TerminalReason::EnvironmentDone | TerminalReason::TargetReached
        );
        self.sink.emit(AgentEvent::RunFinished {
            steps: actions.len(),
            success,
            terminal_reason: terminal_reason.clone(),
            timestamp: Utc::now(),
        });

        let final_state = states.last().cloned().unwrap_or_else(|| InformationState::new(""));
        Ok(RunResult {
            states,
            actions,
            rewards,
            success,
            done,
            final_state,
            terminal_reason,
        })
    }

    // -- Reflection ----------------------------------------------------------

    /// Thoughts about `state` (default: the current state) followed by one
    /// line per relevant past experience.
    pub async fn reflect(&self, state: Option<&InformationState>) -> Result<Vec<String>> {
        let state = state
            .or(self.current_state.as_ref())
            .ok_or(AgentError::NoCurrentState)?;
        let mut reflections = Vec::new();

        if let Some(generator) = &self.thought_generator {
            let thoughts = generator.generate_thoughts(state).await?;
            let mut store = self.thoughts.lock().await;
            for thought in thoughts {
                reflections.push(thought.text.clone());
                store.add_thought(thought);
            }
        }

        let experiences = self
            .memory
            .get_relevant_experiences(state, self.settings.max_experiences)
            .await?;
        for (i, exp) in experiences.iter().enumerate() {
            reflections.push(format!(
                "Experience {}: In a similar state, action '{}' was taken with reward {}",
                i + 1,
                exp.transition.action,
                exp.transition.reward
            ));
        }
        Ok(reflections)
    }

    /// Forget the current state, the local history, the memory store and
    /// all thoughts. Tools, policy and target state are kept.
    pub async fn reset(&mut self) -> Result<()> {
        self.current_state = None;
        self.history.clear();
        self.memory.clear().await?;
        self.thoughts.lock().await.clear();
        info!(agent = %self.name, "agent reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RandomPolicy;

    #[test]
    fn terminal_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TerminalReason::MaxStepsReached).unwrap(),
            "max_steps_reached"
        );
        let failed = serde_json::to_value(TerminalReason::StepFailed("boom".into())).unwrap();
        assert_eq!(failed["step_failed"], "boom");
        assert_eq!(
            TerminalReason::StepFailed("boom".into()).to_string(),
            "step failed: boom"
        );
    }

    #[tokio::test]
    async fn act_without_state_is_an_error() {
        let mut agent = Agent::new("a", Arc::new(RandomPolicy::seeded(0)));
        let err = agent.act(None).await.unwrap_err();
        assert!(matches!(err, AgentError::NoCurrentState));
        assert!(matches!(
            agent.run(None, Some(3), false).await.unwrap_err(),
            AgentError::NoCurrentState
        ));
        assert!(agent.reflect(None).await.is_err());
    }

    #[tokio::test]
    async fn pass_through_step_is_recorded() {
        let mut agent = Agent::new("a", Arc::new(RandomPolicy::seeded(0)));
        let start = InformationState::new("inbox").with_actions(["read"]);
        agent.set_current_state(start.clone()).await.unwrap();

        let outcome = agent.act(None).await.unwrap();
        assert_eq!(outcome.action.name, "read");
        assert_eq!(outcome.next_state.text, "After read: inbox");
        assert_eq!(outcome.next_state.parent_id.as_deref(), Some(start.id.as_str()));
        assert!(outcome.success);
        assert_eq!(outcome.reward, 0.0);

        assert_eq!(agent.current_state().unwrap().id, outcome.next_state.id);
        assert_eq!(agent.history().len(), 1);
        let t = agent
            .memory()
            .get_transition(&start.id, &outcome.next_state.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(t.action, "read");
    }

    #[tokio::test]
    async fn call_tool_rejects_unknown_name() {
        let agent = Agent::new("a", Arc::new(RandomPolicy::seeded(0)));
        let err = agent.call_tool("nope", Payload::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownTool { tool_name } if tool_name == "nope"));
        assert!(agent.tool_schemas().is_empty());
    }
}
