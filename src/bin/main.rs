use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use synn_economics::EmissionSchedule;
use synnergy_node::{telemetry, Node, NodeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "synnergy")]
#[command(about = "Synnergy Network validator node", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "synn_consensus=debug"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an in-memory validator node
    Run {
        /// Disable the synthetic transaction generator
        #[arg(long)]
        no_demo: bool,
    },

    /// Print the effective configuration
    ShowConfig,

    /// Print the block reward and its split at a height
    Reward { height: u64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(filter) = cli.log_filter {
        config.log_filter = filter;
    }
    telemetry::init_tracing(&config.log_filter)?;

    match cli.command {
        Commands::Run { no_demo } => {
            if no_demo {
                config.demo.enabled = false;
            }
            let node = Node::in_memory(config).context("building node")?;
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("interrupt received, shutting down"),
                    Err(e) => error!("failed to listen for interrupt: {}", e),
                }
                signal.cancel();
            });
            node.run(shutdown).await;
        }
        Commands::ShowConfig => {
            println!("{}", config.to_json()?);
        }
        Commands::Reward { height } => {
            let schedule = EmissionSchedule::from_config(&config.rewards)?;
            let total = schedule.reward_at(height);
            let split = config.rewards.split;
            println!("height {}: {} units ({} halvings)", height, total, schedule.halvings(height));
            println!("  miner     {}% = {}", split.miner_percent, &total * split.miner_percent / 100u32);
            println!("  validator {}% = {}", split.validator_percent, &total * split.validator_percent / 100u32);
            println!("  treasury  {}% = {}", split.treasury_percent, &total * split.treasury_percent / 100u32);
        }
    }
    Ok(())
}
