//! Information states and the transitions between them.
//!
//! An [`InformationState`] is an immutable snapshot of what is known at one
//! point in an interaction. States form a tree through `parent_id`; a
//! [`StateTransition`] records which action moved the agent from one state to
//! another and what it earned.
//!
//! Similarity between states is a pluggable strategy ([`SimilarityMeasure`]).
//! The default, [`jaccard_similarity`], is purely lexical.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Open-ended structured payload attached to states, transitions, actions
/// and thoughts. Values are dynamically typed JSON and are preserved verbatim.
pub type Payload = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

/// A scoring strategy comparing two states, returning a value in `[0, 1]`.
///
/// Any `Fn(&InformationState, &InformationState) -> f64` closure is a
/// measure, so callers can swap the default without touching call sites.
pub trait SimilarityMeasure: Send + Sync {
    /// Score how close `a` is to `b` (1.0 = identical).
    fn score(&self, a: &InformationState, b: &InformationState) -> f64;
}

impl<F> SimilarityMeasure for F
where
    F: Fn(&InformationState, &InformationState) -> f64 + Send + Sync,
{
    fn score(&self, a: &InformationState, b: &InformationState) -> f64 {
        self(a, b)
    }
}

/// Shared handle to a similarity strategy.
pub type SharedSimilarity = Arc<dyn SimilarityMeasure>;

/// The default similarity strategy, as a shareable handle.
pub fn default_similarity() -> SharedSimilarity {
    Arc::new(jaccard_similarity)
}

/// Jaccard overlap of the case-folded, whitespace-tokenized word sets of the
/// two states' `text`.
///
/// Returns `0.0` when either side has no tokens.
pub fn jaccard_similarity(a: &InformationState, b: &InformationState) -> f64 {
    let left = word_set(&a.text);
    let right = word_set(&b.text);

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let overlap = left.intersection(&right).count();
    let union = left.union(&right).count();
    overlap as f64 / union as f64
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

// ---------------------------------------------------------------------------
// InformationState
// ---------------------------------------------------------------------------

/// Immutable snapshot of the agent's information at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationState {
    /// Unique identifier, assigned at creation and never reassigned.
    pub id: String,

    /// Primary natural-language content; the unit compared for similarity.
    pub text: String,

    /// Structured side payload (tool outputs, accumulated context).
    #[serde(default)]
    pub data: Payload,

    /// Annotations not used by the core algorithms.
    #[serde(default)]
    pub metadata: Payload,

    /// The state this one was derived from. `None` marks a session root.
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Ordered list of action names legal from this state.
    #[serde(default)]
    pub available_actions: Vec<String>,

    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl InformationState {
    /// Create a root state with a fresh time-ordered id and the current time.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            text: text.into(),
            data: Payload::new(),
            metadata: Payload::new(),
            parent_id: None,
            available_actions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a child of `self` carrying the same available actions.
    pub fn derive(&self, text: impl Into<String>) -> Self {
        Self::new(text)
            .with_parent(&self.id)
            .with_actions(self.available_actions.iter().cloned())
    }

    /// Override the generated identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the parent state.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Replace the list of available actions.
    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.available_actions = actions.into_iter().map(Into::into).collect();
        self
    }

    /// Insert one entry into the structured payload.
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Insert one metadata annotation.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the creation time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this state starts a session (has no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether `action` is legal from this state.
    pub fn allows(&self, action: &str) -> bool {
        self.available_actions.iter().any(|a| a == action)
    }

    /// Render the state for inclusion in a model prompt.
    pub fn to_prompt(&self) -> String {
        format!(
            "Current Information State: {}\n\nAvailable Actions: {}",
            self.text,
            self.available_actions.join(", ")
        )
    }

    /// Compare against `target`, using `measure` or the lexical default.
    pub fn compare(
        &self,
        target: &InformationState,
        measure: Option<&dyn SimilarityMeasure>,
    ) -> f64 {
        match measure {
            Some(measure) => measure.score(self, target),
            None => jaccard_similarity(self, target),
        }
    }
}

// ---------------------------------------------------------------------------
// StateTransition
// ---------------------------------------------------------------------------

/// Immutable record of a state change caused by an action.
///
/// The ordered pair (`source_state_id`, `target_state_id`) is the natural
/// key: stores keep at most one transition per pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub source_state_id: String,
    pub target_state_id: String,

    /// Name of the action that caused the transition.
    pub action: String,

    /// Arguments the action was bound with.
    #[serde(default)]
    pub action_params: Payload,

    /// Whether the action succeeded.
    pub success: bool,

    /// Reward assigned when the transition was recorded.
    #[serde(default)]
    pub reward: f64,

    /// Creation time.
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: Payload,
}

impl StateTransition {
    /// A successful, zero-reward transition stamped with the current time.
    pub fn new(
        source_state_id: impl Into<String>,
        target_state_id: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            source_state_id: source_state_id.into(),
            target_state_id: target_state_id.into(),
            action: action.into(),
            action_params: Payload::new(),
            success: true,
            reward: 0.0,
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    pub fn with_params(mut self, params: Payload) -> Self {
        self.action_params = params;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = reward;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The natural `(source, target)` key.
    pub fn key(&self) -> (&str, &str) {
        (&self.source_state_id, &self.target_state_id)
    }

    /// A printable label for logs and reward subjects. Not a unique key:
    /// use [`StateTransition::key`] for lookups.
    pub fn id(&self) -> String {
        format!("{}->{}", self.source_state_id, self.target_state_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_counts_shared_words() {
        let a = InformationState::new("cat dog");
        let b = InformationState::new("dog bird");
        let score = jaccard_similarity(&a, &b);
        assert!((score - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn jaccard_identity_is_one() {
        let s = InformationState::new("The quick brown fox");
        assert_eq!(jaccard_similarity(&s, &s), 1.0);
    }

    #[test]
    fn jaccard_is_case_insensitive() {
        let a = InformationState::new("Weather TODAY");
        let b = InformationState::new("weather today");
        assert_eq!(jaccard_similarity(&a, &b), 1.0);
    }

    #[test]
    fn jaccard_empty_text_scores_zero() {
        let a = InformationState::new("");
        let b = InformationState::new("something");
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
        assert_eq!(jaccard_similarity(&b, &a), 0.0);
        assert_eq!(jaccard_similarity(&a, &a), 0.0);
    }

    #[test]
    fn compare_uses_injected_measure() {
        let a = InformationState::new("alpha");
        let b = InformationState::new("beta");
        let always_half = |_: &InformationState, _: &InformationState| 0.5;
        assert_eq!(a.compare(&b, Some(&always_half as &dyn SimilarityMeasure)), 0.5);
        assert_eq!(a.compare(&b, None), 0.0);
    }

    #[test]
    fn derive_links_parent_and_actions() {
        let root = InformationState::new("root").with_actions(["search", "answer"]);
        let child = root.derive("child");
        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.available_actions, root.available_actions);
        assert_ne!(child.id, root.id);
        assert!(root.is_root());
        assert!(!child.is_root());
        assert!(child.timestamp >= root.timestamp);
    }

    #[test]
    fn to_prompt_lists_actions() {
        let s = InformationState::new("user wants weather").with_actions(["check_weather", "ask"]);
        assert_eq!(
            s.to_prompt(),
            "Current Information State: user wants weather\n\nAvailable Actions: check_weather, ask"
        );
    }

    #[test]
    fn state_serde_preserves_payload() {
        let s = InformationState::new("x")
            .with_data("nested", serde_json::json!({"a": [1, true, "s"]}))
            .with_metadata("source", serde_json::json!("test"));
        let json = serde_json::to_string(&s).unwrap();
        let back: InformationState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn transition_key_and_id() {
        let t = StateTransition::new("a", "b", "move").with_reward(0.5);
        assert_eq!(t.key(), ("a", "b"));
        assert_eq!(t.id(), "a->b");
        assert!(t.success);
        assert_eq!(t.reward, 0.5);
    }
}
