//! Tether CLI - Inspect credentials and replay queued requests
//!
//! Offline request queue and token tooling for the terminal.

mod cli;
mod commands;
mod error;
mod keychain;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::auth::{run_login, run_logout, run_token};
use crate::commands::common::Context;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tether=info,tether_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let context = Context::load(cli.config, cli.db_path, &cli.profile)?;

    match cli.command {
        Commands::Login {
            access_token,
            refresh_token,
        } => run_login(&context, &access_token, &refresh_token).await?,
        Commands::Logout => run_logout(&context).await?,
        Commands::Token { command } => run_token(&context, command).await?,
        Commands::Queue { command } => run_queue(&context, command).await?,
        Commands::Sync { watch } => run_sync(&context, watch).await?,
        Commands::Status { json } => run_status(&context, json).await?,
    }

    Ok(())
}
