//! Reasoning traces.
//!
//! A [`Thought`] is one intermediate reasoning step about a state. Thoughts
//! for the same state are kept in insertion order, and a chain of reasoning
//! is recovered by following `parent_id` back to its first step.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::state::Payload;

/// One reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,

    /// The content of the thought.
    pub text: String,

    /// Open-ended kind, e.g. `analyze`, `plan`, `decide`, `reflect`.
    #[serde(rename = "type")]
    pub kind: String,

    /// The state this thought concerns.
    pub state_id: String,

    /// The previous thought in the same chain.
    #[serde(default)]
    pub parent_id: Option<String>,

    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub metadata: Payload,
}

impl Thought {
    pub fn new(
        text: impl Into<String>,
        kind: impl Into<String>,
        state_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            text: text.into(),
            kind: kind.into(),
            state_id: state_id.into(),
            parent_id: None,
            timestamp: Utc::now(),
            metadata: Payload::new(),
        }
    }

    /// Chain this thought after `parent_id`.
    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// In-process forest of thoughts, indexed globally and per state.
#[derive(Debug, Clone, Default)]
pub struct ThoughtStore {
    thoughts: HashMap<String, Thought>,
    by_state: HashMap<String, Vec<String>>,
}

impl ThoughtStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a thought and append it to its state's list.
    pub fn add_thought(&mut self, thought: Thought) {
        debug!(
            thought_id = %thought.id,
            state_id = %thought.state_id,
            kind = %thought.kind,
            "thought added"
        );
        self.by_state
            .entry(thought.state_id.clone())
            .or_default()
            .push(thought.id.clone());
        self.thoughts.insert(thought.id.clone(), thought);
    }

    pub fn get_thought(&self, id: &str) -> Option<&Thought> {
        self.thoughts.get(id)
    }

    /// All thoughts recorded for `state_id`, in insertion order.
    pub fn get_thoughts_for_state(&self, state_id: &str) -> Vec<Thought> {
        self.by_state
            .get(state_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.thoughts.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The chain ending at `starting_id`, oldest first.
    ///
    /// Stops at the first missing parent, and at a repeated id so a corrupted
    /// parent link cannot loop.
    pub fn get_thought_chain(&self, starting_id: &str) -> Vec<Thought> {
        let mut chain = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut current = Some(starting_id.to_owned());

        while let Some(id) = current {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(thought) = self.thoughts.get(&id) else {
                break;
            };
            current = thought.parent_id.clone();
            chain.push(thought.clone());
        }

        chain.reverse();
        chain
    }

    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }

    /// Wipe both indices.
    pub fn clear(&mut self) {
        debug!(entries = self.thoughts.len(), "thought_store.clear");
        self.thoughts.clear();
        self.by_state.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(store: &mut ThoughtStore, state_id: &str, kinds: &[&str]) -> Vec<String> {
        let mut parent = None;
        let mut ids = Vec::new();
        for kind in kinds {
            let t =
                Thought::new(format!("{kind} step"), *kind, state_id).with_parent(parent.clone());
            parent = Some(t.id.clone());
            ids.push(t.id.clone());
            store.add_thought(t);
        }
        ids
    }

    #[test]
    fn thoughts_for_state_keep_insertion_order() {
        let mut store = ThoughtStore::new();
        chain(&mut store, "s1", &["analyze", "plan", "decide"]);
        chain(&mut store, "s2", &["reflect"]);

        let kinds: Vec<String> = store
            .get_thoughts_for_state("s1")
            .into_iter()
            .map(|t| t.kind)
            .collect();
        assert_eq!(kinds, vec!["analyze", "plan", "decide"]);
        assert_eq!(store.get_thoughts_for_state("s2").len(), 1);
        assert!(store.get_thoughts_for_state("missing").is_empty());
    }

    #[test]
    fn chain_is_reconstructed_oldest_first() {
        let mut store = ThoughtStore::new();
        let ids = chain(&mut store, "s1", &["analyze", "plan", "decide"]);

        let chain = store.get_thought_chain(&ids[2]);
        let got: Vec<&str> = chain.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(got, vec![ids[0].as_str(), ids[1].as_str(), ids[2].as_str()]);

        let partial = store.get_thought_chain(&ids[1]);
        assert_eq!(partial.len(), 2);
        assert!(store.get_thought_chain("nope").is_empty());
    }

    #[test]
    fn chain_stops_at_dangling_parent() {
        let mut store = ThoughtStore::new();
        let t = Thought::new("orphan", "plan", "s").with_parent(Some("gone".into()));
        let id = t.id.clone();
        store.add_thought(t);
        assert_eq!(store.get_thought_chain(&id).len(), 1);
    }

    #[test]
    fn clear_wipes_everything() {
        let mut store = ThoughtStore::new();
        let ids = chain(&mut store, "s1", &["analyze"]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.get_thought(&ids[0]).is_none());
        assert!(store.get_thoughts_for_state("s1").is_empty());
    }

    #[test]
    fn thought_kind_serializes_as_type() {
        let t = Thought::new("x", "plan", "s");
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["type"], "plan");
    }
}
