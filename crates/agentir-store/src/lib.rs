//! # agentir-store
//!
//! State graph storage for agentir.
//!
//! Holds the data model shared by every agent component (information
//! states, transitions and reasoning thoughts) and two interchangeable
//! [`MemoryStore`] backends: a volatile in-process graph and a SQLite store
//! with a moka hot cache in front of it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  MemoryStore (async trait)                   │
//! ├──────────────────────┬───────────────────────┤
//! │  InMemoryStore       │  PersistentMemory     │
//! │  (RwLock<Graph>)     │  CacheLayer (moka)    │
//! │                      │  Database (WAL)       │
//! │                      │  Migrations           │
//! └──────────────────────┴───────────────────────┘
//!   ThoughtStore (per-agent, in-process)
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use agentir_store::{InformationState, MemoryStore, PersistentMemory, StateTransition};
//!
//! let store = PersistentMemory::open("data/agentir.db").await?;
//! let root = InformationState::new("user asks for the weather");
//! let next = root.derive("weather fetched");
//! store.add_state(root.clone()).await?;
//! store.add_state(next.clone()).await?;
//! store.add_transition(StateTransition::new(&root.id, &next.id, "check_weather")).await?;
//! ```

pub mod cache;
pub mod db;
pub mod error;
pub mod memory;
pub mod migration;
pub mod persistent;
pub mod state;
pub mod thought;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheLayer, CacheLayerBuilder, CacheStats};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use memory::{Experience, InMemoryStore, MemoryStore};
pub use persistent::PersistentMemory;
pub use state::{
    InformationState, Payload, SharedSimilarity, SimilarityMeasure, StateTransition,
    default_similarity, jaccard_similarity,
};
pub use thought::{Thought, ThoughtStore};
