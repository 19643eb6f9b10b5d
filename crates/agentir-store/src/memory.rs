//! The state graph: the [`MemoryStore`] contract and its in-process
//! implementation.
//!
//! | Index              | Shape                              | Purpose                    |
//! |--------------------|------------------------------------|----------------------------|
//! | `states`           | id -> state                        | point lookups              |
//! | `order`            | ids in first-insertion order       | unranked search            |
//! | `transitions`      | (source, target) -> transition     | natural-key upsert         |
//! | `transitions_from` | source -> {target}                 | forward traversal          |
//! | `transitions_to`   | target -> {source}                 | backward traversal         |
//!
//! The adjacency indices are read-modify-write structures; the in-process
//! store serialises every access through one `RwLock`.

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::StoreResult;
use crate::state::{InformationState, StateTransition};

/// A past state paired with one of its outgoing transitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Experience {
    pub state: InformationState,
    pub transition: StateTransition,
}

// ═══════════════════════════════════════════════════════════════════════
//  Contract
// ═══════════════════════════════════════════════════════════════════════

/// Storage contract for the state/transition graph.
///
/// Lookups signal absence with `Ok(None)` or an empty list; they never
/// fabricate records. Every completed mutation is visible to the next read.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Idempotent upsert keyed by `state.id`.
    async fn add_state(&self, state: InformationState) -> StoreResult<()>;

    /// Upsert keyed by `(source_state_id, target_state_id)`, maintaining the
    /// forward and backward adjacency indices.
    async fn add_transition(&self, transition: StateTransition) -> StoreResult<()>;

    async fn get_state(&self, id: &str) -> StoreResult<Option<InformationState>>;

    async fn get_transition(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> StoreResult<Option<StateTransition>>;

    /// All transitions leaving `id`, oldest first.
    async fn get_transitions_from(&self, id: &str) -> StoreResult<Vec<StateTransition>>;

    /// All transitions entering `id`, oldest first.
    async fn get_transitions_to(&self, id: &str) -> StoreResult<Vec<StateTransition>>;

    /// Case-insensitive substring match on `text`, first `limit` states in
    /// insertion order. Not ranked.
    async fn search_states(&self, query: &str, limit: usize) -> StoreResult<Vec<InformationState>>;

    /// Up to `max_results` (past state, outgoing transition) pairs, most
    /// recent state first.
    ///
    /// The queried state and states without outgoing transitions are
    /// skipped; for each past state its most recent transition is used. This
    /// is a recency heuristic; callers needing relevance must re-rank.
    async fn get_relevant_experiences(
        &self,
        state: &InformationState,
        max_results: usize,
    ) -> StoreResult<Vec<Experience>>;

    /// Drop all states, transitions and indices.
    async fn clear(&self) -> StoreResult<()>;

    /// The chain of states leading to `id`, root first.
    ///
    /// Stops quietly at a dangling `parent_id` and at a repeated id.
    async fn get_state_history(&self, id: &str) -> StoreResult<Vec<InformationState>> {
        let mut history = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(id.to_owned());

        while let Some(state_id) = current {
            if !seen.insert(state_id.clone()) {
                break;
            }
            let Some(state) = self.get_state(&state_id).await? else {
                break;
            };
            current = state.parent_id.clone();
            history.push(state);
        }

        history.reverse();
        Ok(history)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  In-process implementation
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct Graph {
    states: HashMap<String, InformationState>,
    order: Vec<String>,
    transitions: HashMap<(String, String), StateTransition>,
    transitions_from: HashMap<String, BTreeSet<String>>,
    transitions_to: HashMap<String, BTreeSet<String>>,
}

impl Graph {
    fn outgoing(&self, id: &str) -> Vec<StateTransition> {
        let mut found: Vec<StateTransition> = self
            .transitions_from
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|target| self.transitions.get(&(id.to_owned(), target.clone())))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.timestamp);
        found
    }

    fn incoming(&self, id: &str) -> Vec<StateTransition> {
        let mut found: Vec<StateTransition> = self
            .transitions_to
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|source| self.transitions.get(&(source.clone(), id.to_owned())))
            .cloned()
            .collect();
        found.sort_by_key(|t| t.timestamp);
        found
    }
}

/// Volatile graph store living entirely in RAM.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    graph: RwLock<Graph>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        debug!("initialized in-memory state store");
        Self::default()
    }

    /// Number of stored states.
    pub async fn state_count(&self) -> usize {
        self.graph.read().await.states.len()
    }

    /// Number of stored transitions.
    pub async fn transition_count(&self) -> usize {
        self.graph.read().await.transitions.len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    #[instrument(skip(self, state), fields(state_id = %state.id))]
    async fn add_state(&self, state: InformationState) -> StoreResult<()> {
        let mut graph = self.graph.write().await;
        if !graph.states.contains_key(&state.id) {
            graph.order.push(state.id.clone());
        }
        graph.states.insert(state.id.clone(), state);
        debug!("state stored");
        Ok(())
    }

    #[instrument(
        skip(self, transition),
        fields(source = %transition.source_state_id, target = %transition.target_state_id)
    )]
    async fn add_transition(&self, transition: StateTransition) -> StoreResult<()> {
        let source = transition.source_state_id.clone();
        let target = transition.target_state_id.clone();

        let mut graph = self.graph.write().await;
        graph
            .transitions_from
            .entry(source.clone())
            .or_default()
            .insert(target.clone());
        graph
            .transitions_to
            .entry(target.clone())
            .or_default()
            .insert(source.clone());
        graph.transitions.insert((source, target), transition);
        debug!("transition stored");
        Ok(())
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<InformationState>> {
        Ok(self.graph.read().await.states.get(id).cloned())
    }

    async fn get_transition(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> StoreResult<Option<StateTransition>> {
        let key = (source_id.to_owned(), target_id.to_owned());
        Ok(self.graph.read().await.transitions.get(&key).cloned())
    }

    async fn get_transitions_from(&self, id: &str) -> StoreResult<Vec<StateTransition>> {
        Ok(self.graph.read().await.outgoing(id))
    }

    async fn get_transitions_to(&self, id: &str) -> StoreResult<Vec<StateTransition>> {
        Ok(self.graph.read().await.incoming(id))
    }

    async fn search_states(&self, query: &str, limit: usize) -> StoreResult<Vec<InformationState>> {
        let needle = query.to_lowercase();
        let graph = self.graph.read().await;
        Ok(graph
            .order
            .iter()
            .filter_map(|id| graph.states.get(id))
            .filter(|s| s.text.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_relevant_experiences(
        &self,
        state: &InformationState,
        max_results: usize,
    ) -> StoreResult<Vec<Experience>> {
        let graph = self.graph.read().await;

        // Later insertion wins ties on equal timestamps.
        let mut candidates: Vec<(usize, &InformationState)> = graph
            .order
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| graph.states.get(id).map(|s| (pos, s)))
            .filter(|(_, s)| s.id != state.id)
            .collect();
        candidates.sort_by(|(pa, a), (pb, b)| b.timestamp.cmp(&a.timestamp).then(pb.cmp(pa)));

        Ok(candidates
            .into_iter()
            .filter_map(|(_, past)| {
                graph.outgoing(&past.id).pop().map(|transition| Experience {
                    state: past.clone(),
                    transition,
                })
            })
            .take(max_results)
            .collect())
    }

    async fn clear(&self) -> StoreResult<()> {
        let mut graph = self.graph.write().await;
        *graph = Graph::default();
        info!("cleared in-memory state store");
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn at(text: &str, secs_ago: i64) -> InformationState {
        InformationState::new(text).with_timestamp(Utc::now() - Duration::seconds(secs_ago))
    }

    #[tokio::test]
    async fn add_state_is_idempotent_upsert() {
        let store = InMemoryStore::new();
        let s = InformationState::new("first").with_id("s1");
        store.add_state(s.clone()).await.unwrap();
        store.add_state(s.clone()).await.unwrap();
        assert_eq!(store.state_count().await, 1);

        let updated = InformationState { text: "second".into(), ..s };
        store.add_state(updated).await.unwrap();
        assert_eq!(store.get_state("s1").await.unwrap().unwrap().text, "second");
        assert!(store.get_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_transition_overwrites() {
        let store = InMemoryStore::new();
        store
            .add_transition(StateTransition::new("a", "b", "go").with_reward(1.0))
            .await
            .unwrap();
        store
            .add_transition(StateTransition::new("a", "b", "go").with_reward(2.0))
            .await
            .unwrap();

        assert_eq!(store.transition_count().await, 1);
        assert_eq!(store.get_transitions_from("a").await.unwrap().len(), 1);
        assert_eq!(store.get_transitions_to("b").await.unwrap().len(), 1);
        let t = store.get_transition("a", "b").await.unwrap().unwrap();
        assert_eq!(t.reward, 2.0);
        assert!(store.get_transition("b", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn adjacency_in_both_directions() {
        let store = InMemoryStore::new();
        store.add_transition(StateTransition::new("a", "b", "x")).await.unwrap();
        store.add_transition(StateTransition::new("a", "c", "y")).await.unwrap();
        store.add_transition(StateTransition::new("d", "c", "z")).await.unwrap();

        let from_a: Vec<String> = store
            .get_transitions_from("a")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.target_state_id)
            .collect();
        assert_eq!(from_a.len(), 2);
        assert!(from_a.contains(&"b".to_string()));
        assert!(from_a.contains(&"c".to_string()));

        let into_c = store.get_transitions_to("c").await.unwrap();
        assert_eq!(into_c.len(), 2);
        assert!(store.get_transitions_from("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_is_root_first_and_survives_dangling_parent() {
        let store = InMemoryStore::new();
        let root = InformationState::new("root");
        let mid = root.derive("mid");
        let leaf = mid.derive("leaf");
        for s in [&root, &mid, &leaf] {
            store.add_state(s.clone()).await.unwrap();
        }

        let history = store.get_state_history(&leaf.id).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["root", "mid", "leaf"]);

        let orphan = InformationState::new("orphan").with_parent("missing");
        store.add_state(orphan.clone()).await.unwrap();
        let history = store.get_state_history(&orphan.id).await.unwrap();
        assert_eq!(history.len(), 1);

        assert!(store.get_state_history("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_terminates_on_cycle() {
        let store = InMemoryStore::new();
        store
            .add_state(InformationState::new("a").with_id("a").with_parent("b"))
            .await
            .unwrap();
        store
            .add_state(InformationState::new("b").with_id("b").with_parent("a"))
            .await
            .unwrap();
        assert_eq!(store.get_state_history("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_is_case_insensitive_in_insertion_order() {
        let store = InMemoryStore::new();
        for text in ["Weather in Paris", "calendar", "weather in Rome", "WEATHER alerts"] {
            store.add_state(InformationState::new(text)).await.unwrap();
        }
        let hits = store.search_states("weather", 2).await.unwrap();
        let texts: Vec<&str> = hits.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["Weather in Paris", "weather in Rome"]);
        assert!(store.search_states("nothing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relevant_experiences_prefer_recent_states_with_transitions() {
        let store = InMemoryStore::new();
        let old = at("old", 30);
        let newer = at("newer", 20);
        let no_edges = at("no edges", 10);
        let current = at("current", 0);
        for s in [&old, &newer, &no_edges, &current] {
            store.add_state(s.clone()).await.unwrap();
        }
        store
            .add_transition(StateTransition::new(&old.id, &newer.id, "step1"))
            .await
            .unwrap();
        store
            .add_transition(StateTransition::new(&newer.id, &current.id, "step2"))
            .await
            .unwrap();
        store
            .add_transition(StateTransition::new(&current.id, &old.id, "loop"))
            .await
            .unwrap();

        let exps = store.get_relevant_experiences(&current, 3).await.unwrap();
        let actions: Vec<&str> = exps.iter().map(|e| e.transition.action.as_str()).collect();
        assert_eq!(actions, vec!["step2", "step1"]);
        assert_eq!(exps[0].state.id, newer.id);

        let one = store.get_relevant_experiences(&current, 1).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].transition.action, "step2");
    }

    #[tokio::test]
    async fn new_transition_is_visible_immediately() {
        let store = InMemoryStore::new();
        let a = at("a", 5);
        let b = at("b", 0);
        store.add_state(a.clone()).await.unwrap();
        store.add_state(b.clone()).await.unwrap();
        assert!(store.get_relevant_experiences(&b, 3).await.unwrap().is_empty());

        store
            .add_transition(StateTransition::new(&a.id, &b.id, "act"))
            .await
            .unwrap();
        assert_eq!(store.get_relevant_experiences(&b, 3).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_resets_to_fresh_store() {
        let store = InMemoryStore::new();
        let s = InformationState::new("x");
        store.add_state(s.clone()).await.unwrap();
        store
            .add_transition(StateTransition::new(&s.id, "y", "go"))
            .await
            .unwrap();
        store.clear().await.unwrap();

        assert!(store.get_state(&s.id).await.unwrap().is_none());
        assert!(store.get_transitions_from(&s.id).await.unwrap().is_empty());
        assert!(store.get_transitions_to("y").await.unwrap().is_empty());
        assert!(store.search_states("x", 5).await.unwrap().is_empty());
        assert_eq!(store.state_count().await, 0);
    }
}
