// Honeygraph Node - Entry point

#![allow(dead_code)]

mod cli;
mod forks;
mod graph;
mod network;
mod node;
mod queue;
mod rpc;
mod session;
mod snapshot;
mod types;

#[cfg(test)]
mod tests;

use clap::Parser;
use cli::config::NodeConfig;
use cli::runner::run_node;
use cli::{Cli, Commands};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.verbose { "debug" } else { &cli.log_level };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)),
        )
        .init();

    print_banner();

    match cli.command {
        Commands::Run(cmd) => {
            let config = NodeConfig::from_run_cmd(&cmd).map_err(|e| {
                error!("Configuration error: {}", e);
                anyhow::anyhow!("Configuration error: {}", e)
            })?;

            if let Err(e) = run_node(config).await {
                error!("Node error: {}", e);
                return Err(anyhow::anyhow!("Node error: {}", e));
            }
        }

        Commands::Purge(cmd) => {
            let path = cmd.get_base_path();

            if !cmd.yes {
                println!("This will delete all local sidecar data at: {}", path.display());
                println!("Are you sure? [y/N]");

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            if path.exists() {
                std::fs::remove_dir_all(&path)?;
                info!("Purged sidecar data at: {}", path.display());
            } else {
                info!("No data to purge at: {}", path.display());
            }
        }
    }

    info!("Goodbye!");
    Ok(())
}

/// Print the startup banner
fn print_banner() {
    println!(
        r#"
    ┌─────────────────────────────────────────────┐
    │  honeygraph · fork-aware replication sidecar │
    └─────────────────────────────────────────────┘"#
    );
    println!("    Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}
