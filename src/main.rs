mod args;
mod commands;

use anyhow::Context;
use args::{Cli, Commands};
use clap::Parser;
use nodeplane::ManagerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ManagerConfig::load_from(path),
        None => ManagerConfig::load(),
    }
    .context("failed to load configuration")?;
    let node = commands::Node::new(config)?;

    match cli.command {
        Commands::Serve { host, port } => commands::serve::cmd_serve(node, host, port).await?,
        Commands::Health { json } => commands::health::cmd_health(&node, json).await?,
        Commands::Status { kind, json } => commands::health::cmd_status(&node, &kind, json).await?,
        Commands::Mainchain { source } => commands::transition::cmd_mainchain(&node, &source).await?,
        Commands::Storage {
            mode,
            size_gb,
            apply_now,
        } => commands::transition::cmd_storage(&node, mode.as_deref(), size_gb, apply_now).await?,
        Commands::Restart { kind } => commands::transition::cmd_restart(&node, &kind).await?,
        Commands::Reports { command } => commands::reports::cmd_reports(&node, command).await?,
    }

    Ok(())
}
