//! Shared setup for the subcommands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentir_agent::{AgentirConfig, Completion, MemoryBackend, MemoryStore, OllamaClient};
use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "agentir.toml";

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber. `RUST_LOG` wins over
/// `default_level`.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load `.env`, then the config file (explicit, or `./agentir.toml` if it
/// exists, or defaults), then `AGENTIR_LLM_*` overrides.
pub fn load_config(path: Option<&Path>) -> Result<AgentirConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!(path = %env_file.display(), "loaded .env");
    }

    let mut config = match path {
        Some(path) => AgentirConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            AgentirConfig::from_file(DEFAULT_CONFIG_FILE)?
        }
        None => {
            info!("no config file, using defaults");
            AgentirConfig::default()
        }
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Point the memory section at `db` when given.
pub fn use_sqlite(config: &mut AgentirConfig, db: Option<PathBuf>) {
    if let Some(path) = db {
        config.memory.backend = MemoryBackend::Sqlite;
        config.memory.path = path;
    }
}

/// Open a store that outlives this process; in-memory makes no sense for
/// read-only commands.
pub async fn open_durable_store(config: &AgentirConfig) -> Result<Arc<dyn MemoryStore>> {
    if config.memory.backend != MemoryBackend::Sqlite {
        bail!("this command needs a SQLite store: pass --db or set memory.backend = \"sqlite\"");
    }
    if !config.memory.path.exists() {
        bail!("state store {} does not exist", config.memory.path.display());
    }
    Ok(config.memory.open_store().await?)
}

// ---------------------------------------------------------------------------
// Model clients
// ---------------------------------------------------------------------------

/// An Ollama completion using the configured system prompt, or `role_prompt`
/// when none is configured.
pub fn completion(config: &AgentirConfig, role_prompt: &str) -> Result<Arc<dyn Completion>> {
    let mut client = OllamaClient::new(&config.llm)?;
    if config.llm.system_prompt.is_none() {
        client = client.with_system_prompt(role_prompt);
    }
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_flag_switches_backend() {
        let mut config = AgentirConfig::default();
        use_sqlite(&mut config, None);
        assert_eq!(config.memory.backend, MemoryBackend::InMemory);

        use_sqlite(&mut config, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.memory.backend, MemoryBackend::Sqlite);
        assert_eq!(config.memory.path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn explicit_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[agent]\nmax_steps = 7\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().agent.max_steps, 7);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[tokio::test]
    async fn read_commands_refuse_in_memory_store() {
        let config = AgentirConfig::default();
        assert!(open_durable_store(&config).await.is_err());

        let mut missing = AgentirConfig::default();
        use_sqlite(&mut missing, Some(PathBuf::from("/nonexistent/agentir.db")));
        assert!(open_durable_store(&missing).await.is_err());
    }
}
