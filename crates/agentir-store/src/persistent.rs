//! Durable [`MemoryStore`] backed by SQLite with a moka read-through cache.
//!
//! Each record is stored as its full JSON body next to the few columns the
//! queries filter and sort on. Writes go to SQLite first and then refresh the
//! cache, so a completed `add_*` is visible to every later read.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::cache::{CacheLayer, CacheStats};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::memory::{Experience, MemoryStore};
use crate::state::{InformationState, StateTransition};

/// Default number of cached entries per record kind.
pub const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Default cache time-to-live.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// SQLite-backed state graph.
#[derive(Clone)]
pub struct PersistentMemory {
    db: Database,
    states: CacheLayer<InformationState>,
    transitions: CacheLayer<StateTransition>,
}

impl PersistentMemory {
    /// Wrap an already migrated database.
    pub fn new(db: Database, cache_capacity: u64, cache_ttl_secs: u64) -> Self {
        let states = CacheLayer::builder("states")
            .max_capacity(cache_capacity)
            .ttl_seconds(cache_ttl_secs)
            .build();
        let transitions = CacheLayer::builder("transitions")
            .max_capacity(cache_capacity)
            .ttl_seconds(cache_ttl_secs)
            .build();
        Self {
            db,
            states,
            transitions,
        }
    }

    /// Open (or create) a database file, migrate it and use the default cache.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_cache(path, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_SECS).await
    }

    pub async fn open_with_cache(
        path: impl AsRef<Path>,
        cache_capacity: u64,
        cache_ttl_secs: u64,
    ) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = Database::open_and_migrate(path).await?;
        Ok(Self::new(db, cache_capacity, cache_ttl_secs))
    }

    /// A throwaway in-memory database, mostly for tests.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        db.run_migrations().await?;
        Ok(Self::new(db, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL_SECS))
    }

    /// Hit/miss counters of the state cache.
    pub fn state_cache_stats(&self) -> &CacheStats {
        self.states.stats()
    }

    /// Hit/miss counters of the transition cache.
    pub fn transition_cache_stats(&self) -> &CacheStats {
        self.transitions.stats()
    }

    pub async fn state_count(&self) -> StoreResult<usize> {
        self.count("states").await
    }

    pub async fn transition_count(&self) -> StoreResult<usize> {
        self.count("transitions").await
    }

    async fn count(&self, table: &'static str) -> StoreResult<usize> {
        self.db
            .execute(move |conn| {
                let n: i64 =
                    conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
    }

    async fn query_transitions(
        &self,
        sql: &'static str,
        id: &str,
    ) -> StoreResult<Vec<StateTransition>> {
        let id = id.to_owned();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let bodies = stmt
                    .query_map([&id], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                decode_all(bodies)
            })
            .await
    }
}

// ── row helpers ──────────────────────────────────────────────────────

/// Cache key for a `(source, target)` pair. The source length prefix keeps
/// ids that contain the separator from colliding.
fn transition_key(source_id: &str, target_id: &str) -> String {
    format!("{}:{source_id}:{target_id}", source_id.len())
}

fn micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn decode_all<T: serde::de::DeserializeOwned>(bodies: Vec<String>) -> StoreResult<Vec<T>> {
    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(StoreError::from))
        .collect()
}

fn latest_transition_from(conn: &Connection, id: &str) -> StoreResult<Option<StateTransition>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM transitions WHERE source_id = ?1 \
             ORDER BY timestamp DESC, target_id DESC LIMIT 1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
        .transpose()
}

// ── MemoryStore ──────────────────────────────────────────────────────

#[async_trait]
impl MemoryStore for PersistentMemory {
    #[instrument(skip(self, state), fields(state_id = %state.id))]
    async fn add_state(&self, state: InformationState) -> StoreResult<()> {
        let body = serde_json::to_string(&state)?;
        let row = (
            state.id.clone(),
            state.text.clone(),
            state.parent_id.clone(),
            micros(state.timestamp),
        );

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO states (id, text, parent_id, timestamp, body) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(id) DO UPDATE SET \
                        text = excluded.text, \
                        parent_id = excluded.parent_id, \
                        timestamp = excluded.timestamp, \
                        body = excluded.body",
                    rusqlite::params![row.0, row.1, row.2, row.3, body],
                )?;
                Ok(())
            })
            .await?;

        let id = state.id.clone();
        self.states.insert(&id, state).await;
        debug!("state persisted");
        Ok(())
    }

    #[instrument(
        skip(self, transition),
        fields(source = %transition.source_state_id, target = %transition.target_state_id)
    )]
    async fn add_transition(&self, transition: StateTransition) -> StoreResult<()> {
        let body = serde_json::to_string(&transition)?;
        let row = (
            transition.source_state_id.clone(),
            transition.target_state_id.clone(),
            transition.action.clone(),
            micros(transition.timestamp),
        );

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO transitions (source_id, target_id, action, timestamp, body) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(source_id, target_id) DO UPDATE SET \
                        action = excluded.action, \
                        timestamp = excluded.timestamp, \
                        body = excluded.body",
                    rusqlite::params![row.0, row.1, row.2, row.3, body],
                )?;
                Ok(())
            })
            .await?;

        let key = transition_key(&transition.source_state_id, &transition.target_state_id);
        self.transitions.insert(&key, transition).await;
        debug!("transition persisted");
        Ok(())
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<InformationState>> {
        if let Some(state) = self.states.get(id).await {
            return Ok(Some(state));
        }

        let key = id.to_owned();
        let found: Option<InformationState> = self
            .db
            .execute(move |conn| {
                let body: Option<String> = conn
                    .query_row("SELECT body FROM states WHERE id = ?1", [&key], |row| {
                        row.get(0)
                    })
                    .optional()?;
                body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                    .transpose()
            })
            .await?;

        if let Some(state) = &found {
            self.states.insert(id, state.clone()).await;
        }
        Ok(found)
    }

    async fn get_transition(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> StoreResult<Option<StateTransition>> {
        let cache_key = transition_key(source_id, target_id);
        if let Some(t) = self.transitions.get(&cache_key).await {
            return Ok(Some(t));
        }

        let (src, dst) = (source_id.to_owned(), target_id.to_owned());
        let found: Option<StateTransition> = self
            .db
            .execute(move |conn| {
                let body: Option<String> = conn
                    .query_row(
                        "SELECT body FROM transitions WHERE source_id = ?1 AND target_id = ?2",
                        [&src, &dst],
                        |row| row.get(0),
                    )
                    .optional()?;
                body.map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                    .transpose()
            })
            .await?;

        if let Some(t) = &found {
            self.transitions.insert(&cache_key, t.clone()).await;
        }
        Ok(found)
    }

    async fn get_transitions_from(&self, id: &str) -> StoreResult<Vec<StateTransition>> {
        self.query_transitions(
            "SELECT body FROM transitions WHERE source_id = ?1 \
             ORDER BY timestamp ASC, target_id ASC",
            id,
        )
        .await
    }

    async fn get_transitions_to(&self, id: &str) -> StoreResult<Vec<StateTransition>> {
        self.query_transitions(
            "SELECT body FROM transitions WHERE target_id = ?1 \
             ORDER BY timestamp ASC, source_id ASC",
            id,
        )
        .await
    }

    /// SQLite's `lower()` folds ASCII only, so non-ASCII matching is
    /// case-sensitive here.
    #[instrument(skip(self))]
    async fn search_states(&self, query: &str, limit: usize) -> StoreResult<Vec<InformationState>> {
        let query = query.to_owned();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM states WHERE instr(lower(text), lower(?1)) > 0 \
                     ORDER BY seq ASC LIMIT ?2",
                )?;
                let bodies = stmt
                    .query_map(rusqlite::params![query, limit], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                decode_all(bodies)
            })
            .await
    }

    #[instrument(skip(self, state), fields(state_id = %state.id))]
    async fn get_relevant_experiences(
        &self,
        state: &InformationState,
        max_results: usize,
    ) -> StoreResult<Vec<Experience>> {
        let exclude = state.id.clone();
        let limit = i64::try_from(max_results).unwrap_or(i64::MAX);
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM states s \
                     WHERE s.id != ?1 \
                       AND EXISTS (SELECT 1 FROM transitions t WHERE t.source_id = s.id) \
                     ORDER BY s.timestamp DESC, s.seq DESC LIMIT ?2",
                )?;
                let bodies = stmt
                    .query_map(rusqlite::params![exclude, limit], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut experiences = Vec::with_capacity(bodies.len());
                for past in decode_all::<InformationState>(bodies)? {
                    if let Some(transition) = latest_transition_from(conn, &past.id)? {
                        experiences.push(Experience {
                            state: past,
                            transition,
                        });
                    }
                }
                Ok(experiences)
            })
            .await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.db
            .execute_mut(|conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM transitions", [])?;
                tx.execute("DELETE FROM states", [])?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        info!(
            state_cache = %self.states.stats(),
            transition_cache = %self.transitions.stats(),
            "cleared persistent state store"
        );
        self.states.invalidate_all().await;
        self.transitions.invalidate_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[tokio::test]
    async fn reads_hit_cache_after_write() {
        let store = PersistentMemory::in_memory().await.unwrap();
        let s = InformationState::new("cached").with_id("s1");
        store.add_state(s.clone()).await.unwrap();

        assert_eq!(store.get_state("s1").await.unwrap(), Some(s));
        assert_eq!(store.state_cache_stats().hits(), 1);

        assert!(store.get_state("missing").await.unwrap().is_none());
        assert_eq!(store.state_cache_stats().misses(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_first_insertion_position() {
        let store = PersistentMemory::in_memory().await.unwrap();
        store
            .add_state(InformationState::new("note one").with_id("a"))
            .await
            .unwrap();
        store
            .add_state(InformationState::new("note two").with_id("b"))
            .await
            .unwrap();
        store
            .add_state(InformationState::new("note one revised").with_id("a"))
            .await
            .unwrap();

        let hits = store.search_states("NOTE", 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(hits[0].text, "note one revised");
        assert_eq!(store.state_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn transition_pair_is_unique() {
        let store = PersistentMemory::in_memory().await.unwrap();
        store
            .add_transition(StateTransition::new("a", "b", "go").with_reward(1.0))
            .await
            .unwrap();
        store
            .add_transition(StateTransition::new("a", "b", "go").with_reward(3.0))
            .await
            .unwrap();

        assert_eq!(store.transition_count().await.unwrap(), 1);
        let t = store.get_transition("a", "b").await.unwrap().unwrap();
        assert_eq!(t.reward, 3.0);
        assert_eq!(store.get_transitions_to("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ids_containing_separators_do_not_alias() {
        let store = PersistentMemory::in_memory().await.unwrap();
        store
            .add_transition(StateTransition::new("a->b", "c", "first"))
            .await
            .unwrap();
        store
            .add_transition(StateTransition::new("a:1", "b", "second"))
            .await
            .unwrap();

        assert!(store.get_transition("a", "b->c").await.unwrap().is_none());
        assert!(store.get_transition("a", "1:b").await.unwrap().is_none());
        let t = store.get_transition("a->b", "c").await.unwrap().unwrap();
        assert_eq!(t.action, "first");
        assert_ne!(transition_key("a->b", "c"), transition_key("a", "b->c"));
    }

    #[tokio::test]
    async fn experiences_use_latest_outgoing_transition() {
        let store = PersistentMemory::in_memory().await.unwrap();
        let now = Utc::now();
        let past = InformationState::new("past").with_timestamp(now - Duration::seconds(10));
        let current = InformationState::new("current").with_timestamp(now);
        store.add_state(past.clone()).await.unwrap();
        store.add_state(current.clone()).await.unwrap();

        store
            .add_transition(
                StateTransition::new(&past.id, "x", "older")
                    .with_timestamp(now - Duration::seconds(5)),
            )
            .await
            .unwrap();
        store
            .add_transition(
                StateTransition::new(&past.id, "y", "newer")
                    .with_timestamp(now - Duration::seconds(1)),
            )
            .await
            .unwrap();

        let exps = store.get_relevant_experiences(&current, 5).await.unwrap();
        assert_eq!(exps.len(), 1);
        assert_eq!(exps[0].state.id, past.id);
        assert_eq!(exps[0].transition.action, "newer");
    }

    #[tokio::test]
    async fn clear_drops_rows_and_cache() {
        let store = PersistentMemory::in_memory().await.unwrap();
        let s = InformationState::new("gone soon");
        store.add_state(s.clone()).await.unwrap();
        store
            .add_transition(StateTransition::new(&s.id, "t", "go"))
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.get_state(&s.id).await.unwrap().is_none());
        assert!(store.get_transition(&s.id, "t").await.unwrap().is_none());
        assert_eq!(store.state_count().await.unwrap(), 0);
        assert_eq!(store.transition_count().await.unwrap(), 0);
    }
}
