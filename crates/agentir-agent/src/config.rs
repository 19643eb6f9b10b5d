//! Agent configuration.
//!
//! [`AgentirConfig`] is read from a TOML file in which every section and
//! every key is optional:
//!
//! ```toml
//! [agent]
//! max_steps = 10
//! success_threshold = 0.9
//!
//! [reward]
//! target_state_weight = 0.7
//! custom_rewards = { brevity = 0.2 }
//!
//! [llm]
//! base_url = "http://localhost:11434"
//! model = "deepseek-r1:14b"
//!
//! [thoughts]
//! enabled = true
//! steps = ["analyze", "plan", "decide"]
//!
//! [memory]
//! backend = "sqlite"
//! path = "agentir.db"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentir_store::{InMemoryStore, MemoryStore, PersistentMemory};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AgentError, Result};
use crate::reward::RewardConfig;

/// Environment variable overriding `llm.model`.
pub const ENV_LLM_MODEL: &str = "AGENTIR_LLM_MODEL";

/// Environment variable overriding `llm.base_url`.
pub const ENV_LLM_BASE_URL: &str = "AGENTIR_LLM_BASE_URL";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Agent loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Upper bound on steps in one run.
    pub max_steps: usize,

    /// Similarity to the target state above which a run counts as done.
    pub success_threshold: f64,

    /// Subtracted from the reward of a step whose action failed.
    pub failure_penalty: f64,

    /// Past experiences fetched for each action prompt.
    pub max_experiences: usize,

    /// Let a hybrid policy nudge its sub-policy weights after each step.
    pub update_policy_weights: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: 10,
            success_threshold: 0.9,
            failure_penalty: 1.0,
            max_experiences: 3,
            update_policy_weights: false,
        }
    }
}

/// Connection settings for the Ollama completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,

    /// Sent as `num_predict`.
    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "deepseek-r1:14b".into(),
            temperature: 0.7,
            max_tokens: 2000,
            system_prompt: None,
            timeout_secs: 120,
        }
    }
}

/// Chain-of-thought generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtsConfig {
    pub enabled: bool,
    pub steps: Vec<String>,
    pub max_thoughts: usize,
}

impl Default for ThoughtsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            steps: vec!["analyze".into(), "plan".into(), "decide".into()],
            max_thoughts: 3,
        }
    }
}

/// Which [`MemoryStore`] implementation backs the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryBackend {
    InMemory,
    Sqlite,
}

/// State graph storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub backend: MemoryBackend,

    /// SQLite file, used by the `sqlite` backend only.
    pub path: PathBuf,

    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::InMemory,
            path: PathBuf::from("agentir.db"),
            cache_capacity: 10_000,
            cache_ttl_secs: 300,
        }
    }
}

impl MemoryConfig {
    /// Open the configured store.
    pub async fn open_store(&self) -> Result<Arc<dyn MemoryStore>> {
        match self.backend {
            MemoryBackend::InMemory => {
                debug!("using in-memory state store");
                Ok(Arc::new(InMemoryStore::new()))
            }
            MemoryBackend::Sqlite => {
                let store = PersistentMemory::open_with_cache(
                    &self.path,
                    self.cache_capacity,
                    self.cache_ttl_secs,
                )
                .await?;
                info!(path = %self.path.display(), "using sqlite state store");
                Ok(Arc::new(store))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Complete configuration of an agent session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentirConfig {
    pub agent: AgentSettings,
    pub reward: RewardConfig,
    pub llm: LlmConfig,
    pub thoughts: ThoughtsConfig,
    pub memory: MemoryConfig,
}

impl AgentirConfig {
    /// Read and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "configuration loaded from file");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to serialize config: {e}"),
        })
    }

    /// Apply `AGENTIR_LLM_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup(ENV_LLM_MODEL).filter(|v| !v.is_empty()) {
            debug!(%model, "llm model overridden from environment");
            self.llm.model = model;
        }
        if let Some(url) = lookup(ENV_LLM_BASE_URL).filter(|v| !v.is_empty()) {
            debug!(%url, "llm base url overridden from environment");
            self.llm.base_url = url;
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Err(AgentError::ConfigError { reason });

        if self.agent.max_steps == 0 {
            return fail("agent.max_steps must be at least 1".into());
        }
        let threshold = self.agent.success_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return fail(format!(
                "agent.success_threshold must be in (0, 1], got {threshold}"
            ));
        }
        if !(self.agent.failure_penalty >= 0.0) {
            return fail("agent.failure_penalty must be non-negative".into());
        }

        for (name, weight) in [
            ("target_state_weight", self.reward.target_state_weight),
            ("step_cost_weight", self.reward.step_cost_weight),
            ("time_cost_weight", self.reward.time_cost_weight),
        ] {
            if !(weight >= 0.0 && weight.is_finite()) {
                return fail(format!("reward.{name} must be a non-negative number, got {weight}"));
            }
        }
        if let Some((name, _)) = self
            .reward
            .custom_rewards
            .iter()
            .find(|(_, w)| !w.is_finite())
        {
            return fail(format!("reward.custom_rewards.{name} must be finite"));
        }

        if !(self.llm.temperature >= 0.0) {
            return fail("llm.temperature must be non-negative".into());
        }
        if self.thoughts.enabled && self.thoughts.steps.is_empty() {
            return fail("thoughts.steps must not be empty when thoughts are enabled".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AgentirConfig::from_toml_str("").unwrap();
        assert_eq!(config, AgentirConfig::default());
        assert_eq!(config.agent.max_steps, 10);
        assert_eq!(config.reward.target_state_weight, 0.7);
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.thoughts.steps, vec!["analyze", "plan", "decide"]);
        assert_eq!(config.memory.backend, MemoryBackend::InMemory);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = AgentirConfig::from_toml_str(
            r#"
            [agent]
            max_steps = 4

            [reward]
            custom_rewards = { brevity = 0.5 }

            [memory]
            backend = "sqlite"
            path = "/tmp/graph.db"
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.max_steps, 4);
        assert_eq!(config.agent.success_threshold, 0.9);
        assert_eq!(config.reward.custom_rewards.get("brevity"), Some(&0.5));
        assert_eq!(config.memory.backend, MemoryBackend::Sqlite);
        assert_eq!(config.memory.path, PathBuf::from("/tmp/graph.db"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for bad in [
            "[agent]\nmax_steps = 0",
            "[agent]\nsuccess_threshold = 1.5",
            "[agent]\nsuccess_threshold = 0.0",
            "[reward]\nstep_cost_weight = -0.1",
            "[llm]\ntemperature = -1.0",
            "[thoughts]\nenabled = true\nsteps = []",
        ] {
            let err = AgentirConfig::from_toml_str(bad).unwrap_err();
            assert!(matches!(err, AgentError::ConfigError { .. }), "{bad}");
        }
        assert!(AgentirConfig::from_toml_str("not = [valid").is_err());
    }

    #[test]
    fn overrides_replace_llm_fields() {
        let mut config = AgentirConfig::default();
        config.apply_overrides(|key| match key {
            ENV_LLM_MODEL => Some("llama3".into()),
            ENV_LLM_BASE_URL => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.llm.model, "llama3");
        assert_eq!(config.llm.base_url, "http://localhost:11434");
    }

    #[test]
    fn toml_output_parses_back() {
        let mut config = AgentirConfig::default();
        config.llm.system_prompt = Some("be brief".into());
        let text = config.to_toml_string().unwrap();
        assert_eq!(AgentirConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn file_loading_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentir.toml");
        assert!(AgentirConfig::from_file(&path).is_err());

        std::fs::write(&path, "[agent]\nmax_steps = 2\n").unwrap();
        assert_eq!(AgentirConfig::from_file(&path).unwrap().agent.max_steps, 2);
    }

    #[tokio::test]
    async fn open_store_honours_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = MemoryConfig {
            backend: MemoryBackend::Sqlite,
            path: dir.path().join("graph.db"),
            ..MemoryConfig::default()
        };
        let store = config.open_store().await.unwrap();
        let s = agentir_store::InformationState::new("persisted");
        store.add_state(s.clone()).await.unwrap();
        assert!(dir.path().join("graph.db").exists());

        let mem = MemoryConfig::default().open_store().await.unwrap();
        assert!(mem.get_state(&s.id).await.unwrap().is_none());
    }
}
