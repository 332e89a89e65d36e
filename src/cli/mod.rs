//! CLI module for Council
//!
//! Provides commands:
//! - `serve`: Run the HTTP server (default)
//! - `ask`: Stream one consensus run to the terminal
//! - `providers`: List the provider roster and credential status

use clap::{Parser, Subcommand};

pub mod ask;
pub mod providers;

/// Council consensus engine CLI
#[derive(Parser, Debug)]
#[command(name = "council")]
#[command(about = "Multi-provider trading signal consensus")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the server (default)
    Serve,
    /// Ask the council once and stream the answers
    Ask {
        /// Question for the analysts
        query: String,
        /// Print raw events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// List configured providers
    Providers,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = crate::server::load_config()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => crate::server::run(config).await,
        Commands::Ask { query, json } => ask::run(&config, &query, json).await,
        Commands::Providers => providers::run(&config).await,
    }
}
