//! CLI entry point for agentir.
//!
//! This binary provides the `agentir` command with subcommands for running
//! the agent and inspecting a persisted state store.

mod cli;
mod commands;
mod helpers;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use helpers::{init_tracing, load_config, use_sqlite};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::cmd_run(config, args).await,
        Commands::History { state_id, db } => {
            use_sqlite(&mut config, db);
            commands::cmd_history(config, &state_id).await
        }
        Commands::Search { query, db, limit } => {
            use_sqlite(&mut config, db);
            commands::cmd_search(config, &query, limit).await
        }
        Commands::Config => commands::cmd_config(&config),
    }
}
