//! Battery Hawk CLI - thin command-line client for batteryhawk-service.

mod cli;
mod client;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use client::ServiceClient;
use commands::{cmd_save, cmd_scan, cmd_set, cmd_show};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Scan { duration } => cmd_scan(duration, cli.json).await,
        Commands::Show { mac } => {
            let client = ServiceClient::new(&cli.service_url)?;
            cmd_show(&client, mac.as_deref(), cli.json).await
        }
        Commands::Set { mac, field, value } => {
            let client = ServiceClient::new(&cli.service_url)?;
            cmd_set(&client, &mac, &field, &value, cli.json).await
        }
        Commands::Save => cmd_save(cli.config_dir).await,
    }
}
