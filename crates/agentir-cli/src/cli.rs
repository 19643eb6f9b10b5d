//! CLI argument definitions for agentir.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// agentir -- an information-retrieval agent driven by a local model.
#[derive(Parser)]
#[command(
    name = "agentir",
    version,
    about = "agentir -- information-retrieval agent",
    long_about = "Runs an agent over a graph of information states, choosing actions with a \
                  local Ollama model and recording every step in a state store."
)]
pub struct Cli {
    /// TOML configuration file. Defaults to ./agentir.toml when present.
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the agent from an initial state.
    Run(RunArgs),

    /// Print the root-first ancestry of a stored state.
    History {
        /// The state id.
        state_id: String,

        /// SQLite state store.
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Find stored states whose text contains a query.
    Search {
        query: String,

        /// SQLite state store.
        #[arg(long)]
        db: Option<PathBuf>,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print the effective configuration.
    Config,
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Text of the initial state.
    pub text: String,

    /// Text of the target state; the run stops once it is reached.
    #[arg(long)]
    pub goal: Option<String>,

    /// An action available in every state (repeatable).
    #[arg(long = "action", short = 'a')]
    pub actions: Vec<String>,

    /// Overrides `agent.max_steps`.
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Generate a chain of thoughts before each action.
    #[arg(long)]
    pub think: bool,

    /// SQLite state store; without it the configured backend is used.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Which policy selects actions.
    #[arg(long, value_enum, default_value_t = PolicyKind::Llm)]
    pub policy: PolicyKind,

    /// Seed for the random policy.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Score steps with the model instead of the rule-based reward.
    #[arg(long)]
    pub llm_reward: bool,

    /// Print reflections on the final state.
    #[arg(long)]
    pub reflect: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyKind {
    Llm,
    Random,
}

impl PolicyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Random => "random",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_arguments_parse() {
        let cli = Cli::try_parse_from([
            "agentir", "run", "plan a trip", "--goal", "trip booked", "-a", "search", "-a",
            "book", "--max-steps", "4", "--policy", "random", "--seed", "9",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.text, "plan a trip");
        assert_eq!(args.goal.as_deref(), Some("trip booked"));
        assert_eq!(args.actions, vec!["search", "book"]);
        assert_eq!(args.max_steps, Some(4));
        assert!(args.policy == PolicyKind::Random);
        assert_eq!(args.seed, Some(9));
        assert!(!args.think);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let argv = ["agentir", "search", "weather", "--limit", "3", "--log-json"];
        let cli = Cli::try_parse_from(argv).unwrap();
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Search { limit: 3, .. }));
    }
}
