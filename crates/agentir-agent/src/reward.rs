//! Reward models.
//!
//! A reward measures progress toward a target state. [`SimpleRewardModel`]
//! composes it in closed form:
//!
//! ```text
//! value = w_sim * similarity(current, target)
//!       - w_step                       (when a transition is given)
//!       - w_time * elapsed_seconds     (when a transition is given)
//!       + sum(w_i * custom_i(..))      (for every custom term with a weight)
//! ```
//!
//! [`LlmRewardModel`] asks a model to grade the state and parses its reply.
//! Either way the [`RewardEvent`] components add up to its value.

use std::collections::BTreeMap;
use std::sync::Arc;

use agentir_store::{
    InformationState, Payload, SharedSimilarity, StateTransition, default_similarity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AgentError, Result};
use crate::llm::Completion;
use crate::policy::format_params;

/// Component name carrying the part of a model-graded value that the model
/// did not attribute to any named component.
pub const UNATTRIBUTED: &str = "unattributed";

// ---------------------------------------------------------------------------
// Configuration and events
// ---------------------------------------------------------------------------

/// Weights of the closed-form reward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Pulls the reward toward similarity with the goal.
    pub target_state_weight: f64,

    /// Charged once per action taken.
    pub step_cost_weight: f64,

    /// Charged per second elapsed since the transition.
    pub time_cost_weight: f64,

    /// Weights of user-supplied terms, by name.
    pub custom_rewards: BTreeMap<String, f64>,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            target_state_weight: 0.7,
            step_cost_weight: 0.1,
            time_cost_weight: 0.01,
            custom_rewards: BTreeMap::new(),
        }
    }
}

/// What a reward was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RewardSubject {
    State(String),
    /// Keyed by [`StateTransition::id`].
    Transition(String),
}

impl RewardSubject {
    fn for_step(current: &InformationState, transition: Option<&StateTransition>) -> Self {
        match transition {
            Some(t) => Self::Transition(t.id()),
            None => Self::State(current.id.clone()),
        }
    }
}

/// Audit record of one reward computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEvent {
    pub subject: RewardSubject,
    pub value: f64,
    pub components: BTreeMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Payload,
}

impl RewardEvent {
    fn new(subject: RewardSubject, value: f64, components: BTreeMap<String, f64>) -> Self {
        Self {
            subject,
            value,
            components,
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    pub fn component_sum(&self) -> f64 {
        self.components.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Scores states and trajectories against a target.
#[async_trait]
pub trait RewardModel: Send + Sync {
    async fn calculate_reward(
        &self,
        current: &InformationState,
        target: &InformationState,
        transition: Option<&StateTransition>,
    ) -> RewardEvent;

    /// Requires exactly one more state than transitions.
    async fn calculate_cumulative_reward(
        &self,
        states: &[InformationState],
        transitions: &[StateTransition],
        target: &InformationState,
    ) -> Result<f64>;
}

/// Enforce `states.len() == transitions.len() + 1`.
pub fn check_trajectory(
    states: &[InformationState],
    transitions: &[StateTransition],
) -> Result<()> {
    let expected = transitions.len() + 1;
    if states.len() != expected {
        return Err(AgentError::TrajectoryLengthMismatch {
            expected,
            actual: states.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Closed form
// ---------------------------------------------------------------------------

/// A user-supplied reward term.
pub type CustomRewardFn = Arc<
    dyn Fn(&InformationState, &InformationState, Option<&StateTransition>) -> f64 + Send + Sync,
>;

/// Weighted sum of goal similarity, step cost, time cost and custom terms.
pub struct SimpleRewardModel {
    config: RewardConfig,
    custom: BTreeMap<String, CustomRewardFn>,
    similarity: SharedSimilarity,
}

impl Default for SimpleRewardModel {
    fn default() -> Self {
        Self::new(RewardConfig::default())
    }
}

impl SimpleRewardModel {
    pub fn new(config: RewardConfig) -> Self {
        Self {
            config,
            custom: BTreeMap::new(),
            similarity: default_similarity(),
        }
    }

    /// Register a custom term. It only contributes if `custom_rewards` has a
    /// weight under the same name.
    pub fn with_custom_reward(mut self, name: impl Into<String>, f: CustomRewardFn) -> Self {
        self.custom.insert(name.into(), f);
        self
    }

    pub fn with_similarity(mut self, similarity: SharedSimilarity) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// [`RewardModel::calculate_reward`] against a fixed clock.
    pub fn calculate_reward_at(
        &self,
        current: &InformationState,
        target: &InformationState,
        transition: Option<&StateTransition>,
        now: DateTime<Utc>,
    ) -> RewardEvent {
        let mut components = BTreeMap::new();

        let similarity = current.compare(target, Some(self.similarity.as_ref()));
        components.insert(
            "target_similarity".to_owned(),
            similarity * self.config.target_state_weight,
        );

        if let Some(t) = transition {
            components.insert("step_cost".to_owned(), -self.config.step_cost_weight);

            if t.timestamp.timestamp() > 0 {
                // Negative elapsed time (clock skew) counts as zero.
                let elapsed = (now - t.timestamp)
                    .to_std()
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                components.insert("time_cost".to_owned(), -elapsed * self.config.time_cost_weight);
            }
        }

        for (name, f) in &self.custom {
            if let Some(weight) = self.config.custom_rewards.get(name) {
                components.insert(name.clone(), weight * f(current, target, transition));
            }
        }

        let value = components.values().sum();
        debug!(value, similarity, "reward calculated");
        RewardEvent::new(RewardSubject::for_step(current, transition), value, components)
    }

    /// [`RewardModel::calculate_cumulative_reward`] against a fixed clock.
    pub fn calculate_cumulative_reward_at(
        &self,
        states: &[InformationState],
        transitions: &[StateTransition],
        target: &InformationState,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        check_trajectory(states, transitions)?;

        let steps: f64 = transitions
            .iter()
            .zip(&states[1..])
            .map(|(t, next)| self.calculate_reward_at(next, target, Some(t), now).value)
            .sum();

        let terminal = match states.last() {
            Some(last) => self.calculate_reward_at(last, target, None, now).value,
            None => 0.0,
        };
        Ok(steps + terminal)
    }
}

#[async_trait]
impl RewardModel for SimpleRewardModel {
    async fn calculate_reward(
        &self,
        current: &InformationState,
        target: &InformationState,
        transition: Option<&StateTransition>,
    ) -> RewardEvent {
        self.calculate_reward_at(current, target, transition, Utc::now())
    }

    async fn calculate_cumulative_reward(
        &self,
        states: &[InformationState],
        transitions: &[StateTransition],
        target: &InformationState,
    ) -> Result<f64> {
        self.calculate_cumulative_reward_at(states, transitions, target, Utc::now())
    }
}

// ---------------------------------------------------------------------------
// Model graded
// ---------------------------------------------------------------------------

const REWARD_PATTERN: &str = r"^Reward:\s*(.*)$";
const COMPONENT_PATTERN: &str = r"^-\s*([^:]+?)\s*:\s*(.*)$";
const CUMULATIVE_PATTERN: &str = r"^Cumulative Reward:\s*(.*)$";

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| AgentError::ConfigError {
        reason: format!("invalid reply pattern `{pattern}`: {e}"),
    })
}

/// Line-oriented parser for grading replies.
pub struct ReplyParser {
    reward: Regex,
    component: Regex,
    cumulative: Regex,
}

impl ReplyParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reward: compile(REWARD_PATTERN)?,
            component: compile(COMPONENT_PATTERN)?,
            cumulative: compile(CUMULATIVE_PATTERN)?,
        })
    }

    /// Extract `Reward:` and `- Name: value` lines. The last `Reward:` wins;
    /// component names are lowercased.
    pub fn parse_reward(&self, reply: &str) -> (f64, BTreeMap<String, f64>) {
        let mut value = 0.0;
        let mut components = BTreeMap::new();

        for line in reply.lines().map(str::trim) {
            if let Some(caps) = self.reward.captures(line) {
                value = parse_number(&caps[1], "reward");
            } else if let Some(caps) = self.component.captures(line) {
                let name = caps[1].trim().to_lowercase();
                let v = parse_number(&caps[2], &name);
                components.insert(name, v);
            }
        }
        (value, components)
    }

    /// Extract the first `Cumulative Reward:` line, defaulting to 0.0.
    pub fn parse_cumulative(&self, reply: &str) -> f64 {
        reply
            .lines()
            .map(str::trim)
            .find_map(|line| self.cumulative.captures(line))
            .map(|caps| parse_number(&caps[1], "cumulative_reward"))
            .unwrap_or(0.0)
    }
}

/// Grades states by prompting a model.
pub struct LlmRewardModel {
    completion: Arc<dyn Completion>,
    parser: ReplyParser,
}

impl LlmRewardModel {
    pub fn new(completion: Arc<dyn Completion>) -> Result<Self> {
        Ok(Self {
            completion,
            parser: ReplyParser::new()?,
        })
    }
}

fn parse_number(raw: &str, field: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            warn!(field, raw, "unparseable number in reward reply, using 0.0");
            0.0
        }
    }
}

/// Build the per-step grading prompt.
pub fn reward_prompt(
    current: &InformationState,
    target: &InformationState,
    transition: Option<&StateTransition>,
) -> String {
    let mut prompt = String::from(
        "You are an evaluation system for an AI agent. Please evaluate the current state \
         compared to the target state and assign a reward.\n\n",
    );
    prompt.push_str(&format!("Target state: {}\n\n", target.text));
    prompt.push_str(&format!("Current state: {}\n\n", current.text));

    if let Some(t) = transition {
        prompt.push_str(&format!("Action taken: {}\n", t.action));
        if !t.action_params.is_empty() {
            prompt.push_str(&format!("Action parameters: {}\n", format_params(&t.action_params)));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Evaluate how close the current state is to the target state. \
         Provide a reward between -1 and 1, where:\n\
         1.0 means the current state fully satisfies the target state.\n\
         0.0 means the current state is neutral or unrelated to the target state.\n\
         -1.0 means the current state is completely opposed to or harmful for reaching the target state.\n\n\
         Please provide your evaluation in the following format:\n\
         Reward: [numerical value between -1 and 1]\n\
         Reasoning: [your reasoning]\n\
         Components:\n\
         - Similarity: [numerical value between 0 and 1]\n\
         - Progress: [numerical value between -1 and 1]\n\
         - Efficiency: [numerical value between -1 and 1]\n",
    );
    prompt
}

/// Build the trajectory grading prompt. `states` must be non-empty.
pub fn cumulative_prompt(
    states: &[InformationState],
    transitions: &[StateTransition],
    target: &InformationState,
) -> String {
    let mut prompt = String::from(
        "You are an evaluation system for an AI agent. Please evaluate the sequence of states \
         and transitions and assign a cumulative reward.\n\n",
    );
    prompt.push_str(&format!("Target state: {}\n\n", target.text));
    if let (Some(first), Some(last)) = (states.first(), states.last()) {
        prompt.push_str(&format!("Initial state: {}\n\n", first.text));
        prompt.push_str(&format!("Final state: {}\n\n", last.text));
    }

    prompt.push_str("Sequence of actions:\n");
    for (i, (t, result)) in transitions.iter().zip(states.iter().skip(1)).enumerate() {
        prompt.push_str(&format!("{}. Action: {}\n", i + 1, t.action));
        if !t.action_params.is_empty() {
            prompt.push_str(&format!("   Parameters: {}\n", format_params(&t.action_params)));
        }
        prompt.push_str(&format!("   Result: {}\n\n", result.text));
    }

    prompt.push_str(
        "Evaluate how well the agent achieved the target state. \
         Provide a cumulative reward between -1 and 1, where:\n\
         1.0 means the agent fully achieved the target state efficiently.\n\
         0.0 means the agent made no progress towards the target state.\n\
         -1.0 means the agent moved away from or damaged the possibility of reaching the target state.\n\n\
         Please provide your evaluation in the following format:\n\
         Cumulative Reward: [numerical value between -1 and 1]\n\
         Reasoning: [your reasoning]\n",
    );
    prompt
}

#[async_trait]
impl RewardModel for LlmRewardModel {
    async fn calculate_reward(
        &self,
        current: &InformationState,
        target: &InformationState,
        transition: Option<&StateTransition>,
    ) -> RewardEvent {
        let reply = self
            .completion
            .complete(&reward_prompt(current, target, transition))
            .await;
        let (value, mut components) = self.parser.parse_reward(&reply);

        // Folded into any `unattributed` line the model wrote itself.
        let residual = value - components.values().sum::<f64>();
        if residual.abs() > f64::EPSILON {
            *components.entry(UNATTRIBUTED.to_owned()).or_insert(0.0) += residual;
        }

        debug!(value, "model-graded reward calculated");
        RewardEvent::new(RewardSubject::for_step(current, transition), value, components)
    }

    async fn calculate_cumulative_reward(
        &self,
        states: &[InformationState],
        transitions: &[StateTransition],
        target: &InformationState,
    ) -> Result<f64> {
        check_trajectory(states, transitions)?;
        let reply = self
            .completion
            .complete(&cumulative_prompt(states, transitions, target))
            .await;
        Ok(self.parser.parse_cumulative(&reply))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::llm::FnCompletion;

    fn half_similarity() -> SharedSimilarity {
        Arc::new(|_: &InformationState, _: &InformationState| 0.5)
    }

    #[test]
    fn reward_with_fresh_transition() {
        let model = SimpleRewardModel::default().with_similarity(half_similarity());
        let now = Utc::now();
        let current = InformationState::new("a");
        let target = InformationState::new("b");
        let t = StateTransition::new("s0", &current.id, "go").with_timestamp(now);

        let event = model.calculate_reward_at(&current, &target, Some(&t), now);
        assert!((event.value - 0.25).abs() < 1e-9);
        assert_eq!(event.components["time_cost"], 0.0);
        assert_eq!(event.subject, RewardSubject::Transition(t.id()));
        assert!((event.component_sum() - event.value).abs() < 1e-12);
    }

    #[test]
    fn elapsed_time_is_charged() {
        let model = SimpleRewardModel::default();
        let now = Utc::now();
        let s = InformationState::new("same text");
        let t = StateTransition::new("x", &s.id, "go").with_timestamp(now - Duration::seconds(10));

        let event = model.calculate_reward_at(&s, &s, Some(&t), now);
        assert!((event.components["time_cost"] + 0.1).abs() < 1e-9);
        assert!((event.value - (0.7 - 0.1 - 0.1)).abs() < 1e-9);

        let future = t.clone().with_timestamp(now + Duration::seconds(5));
        let event = model.calculate_reward_at(&s, &s, Some(&future), now);
        assert_eq!(event.components["time_cost"], 0.0);
    }

    #[test]
    fn state_reward_has_no_costs() {
        let model = SimpleRewardModel::default();
        let s = InformationState::new("cat dog");
        let target = InformationState::new("dog bird");
        let event = model.calculate_reward_at(&s, &target, None, Utc::now());
        assert_eq!(event.components.len(), 1);
        assert!((event.value - 0.7 / 3.0).abs() < 1e-9);
        assert_eq!(event.subject, RewardSubject::State(s.id.clone()));
    }

    #[test]
    fn custom_terms_need_a_weight() {
        let mut config = RewardConfig::default();
        config.custom_rewards.insert("brevity".into(), 2.0);
        let model = SimpleRewardModel::new(config)
            .with_custom_reward(
                "brevity",
                Arc::new(
                    |s: &InformationState, _: &InformationState, _: Option<&StateTransition>| {
                        if s.text.len() < 10 { 1.0 } else { 0.0 }
                    },
                ),
            )
            .with_custom_reward(
                "ignored",
                Arc::new(
                    |_: &InformationState, _: &InformationState, _: Option<&StateTransition>| 100.0,
                ),
            );

        let s = InformationState::new("short");
        let target = InformationState::new("unrelated");
        let event = model.calculate_reward_at(&s, &target, None, Utc::now());
        assert_eq!(event.components["brevity"], 2.0);
        assert!(!event.components.contains_key("ignored"));
        assert!((event.value - 2.0).abs() < 1e-9);
    }

    #[test]
    fn cumulative_is_sum_of_steps_plus_terminal() {
        let model = SimpleRewardModel::default();
        let now = Utc::now();
        let target = InformationState::new("weather in paris");
        let s0 = InformationState::new("hello");
        let s1 = s0.derive("paris");
        let s2 = s1.derive("weather in paris");
        let t0 =
            StateTransition::new(&s0.id, &s1.id, "a").with_timestamp(now - Duration::seconds(2));
        let t1 =
            StateTransition::new(&s1.id, &s2.id, "b").with_timestamp(now - Duration::seconds(1));
        let states = vec![s0, s1.clone(), s2.clone()];
        let transitions = vec![t0.clone(), t1.clone()];

        let total = model
            .calculate_cumulative_reward_at(&states, &transitions, &target, now)
            .unwrap();
        let expected = model.calculate_reward_at(&s1, &target, Some(&t0), now).value
            + model.calculate_reward_at(&s2, &target, Some(&t1), now).value
            + model.calculate_reward_at(&s2, &target, None, now).value;
        assert!((total - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn cumulative_rejects_length_mismatch() {
        let model = SimpleRewardModel::default();
        let target = InformationState::new("t");
        let s = InformationState::new("s");
        let t = StateTransition::new("a", "b", "x");

        let err = model
            .calculate_cumulative_reward(&[s.clone()], &[t], &target)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::TrajectoryLengthMismatch { expected: 2, actual: 1 }
        ));
        assert!(model.calculate_cumulative_reward(&[], &[], &target).await.is_err());
        assert!(model.calculate_cumulative_reward(&[s], &[], &target).await.is_ok());
    }

    #[test]
    fn reward_reply_parsing() {
        let reply = "Reward: 0.6\nReasoning: close enough\nComponents:\n\
                     - Similarity: 0.8\n- Progress: oops\n- Efficiency: -0.1";
        let parser = ReplyParser::new().unwrap();
        let (value, components) = parser.parse_reward(reply);
        assert_eq!(value, 0.6);
        assert_eq!(components["similarity"], 0.8);
        assert_eq!(components["progress"], 0.0);
        assert_eq!(components["efficiency"], -0.1);

        let (value, components) = parser.parse_reward("no structure at all");
        assert_eq!(value, 0.0);
        assert!(components.is_empty());

        assert_eq!(parser.parse_reward("Reward: NaN").0, 0.0);
        let cumulative = "x\nCumulative Reward: 0.4\nCumulative Reward: 0.9";
        assert_eq!(parser.parse_cumulative(cumulative), 0.4);
        assert_eq!(parser.parse_cumulative(""), 0.0);
    }

    #[tokio::test]
    async fn llm_components_sum_to_value() {
        let completion = Arc::new(FnCompletion::new(|_: &str| {
            "Reward: 0.5\n- Similarity: 0.3\n- Progress: 0.1".to_owned()
        }));
        let model = LlmRewardModel::new(completion).unwrap();
        let s = InformationState::new("s");
        let event = model.calculate_reward(&s, &s, None).await;
        assert_eq!(event.value, 0.5);
        assert!((event.components[UNATTRIBUTED] - 0.1).abs() < 1e-9);
        assert!((event.component_sum() - event.value).abs() < 1e-9);
    }

    #[tokio::test]
    async fn model_written_unattributed_line_keeps_the_sum() {
        let completion = Arc::new(FnCompletion::new(|_: &str| {
            "Reward: 0.5\n- Unattributed: 0.2".to_owned()
        }));
        let model = LlmRewardModel::new(completion).unwrap();
        let s = InformationState::new("s");
        let event = model.calculate_reward(&s, &s, None).await;
        assert_eq!(event.value, 0.5);
        assert_eq!(event.components.len(), 1);
        assert!((event.components[UNATTRIBUTED] - 0.5).abs() < 1e-9);
        assert!((event.component_sum() - event.value).abs() < 1e-9);
    }

    #[test]
    fn bad_reply_pattern_is_a_config_error() {
        let err = compile("Reward: (").unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
    }

    #[tokio::test]
    async fn llm_cumulative_checks_length_and_parses() {
        let completion = Arc::new(FnCompletion::new(|p: &str| {
            assert!(p.contains("1. Action: go"));
            "Cumulative Reward: 0.75\nReasoning: fine".to_owned()
        }));
        let model = LlmRewardModel::new(completion).unwrap();
        let s0 = InformationState::new("start");
        let s1 = s0.derive("end");
        let t = StateTransition::new(&s0.id, &s1.id, "go");

        let total = model
            .calculate_cumulative_reward(&[s0.clone(), s1], &[t.clone()], &s0)
            .await
            .unwrap();
        assert_eq!(total, 0.75);
        assert!(model.calculate_cumulative_reward(&[s0.clone()], &[t], &s0).await.is_err());
    }
}
