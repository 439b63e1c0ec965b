//! Relaymesh CLI
//!
//! Validates genesis files and replays block scripts through the executor.

use clap::{Parser, Subcommand};
use relaymesh_node::{init_logging, load_genesis, load_script, replay, App, NodeConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "relaymesh")]
#[command(version)]
#[command(about = "Relaymesh staking core tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "RELAYMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a genesis file without executing blocks
    ValidateGenesis {
        /// Genesis JSON file
        genesis: PathBuf,
    },

    /// Execute a block script on top of a genesis file
    Replay {
        /// Genesis JSON file
        #[arg(short, long)]
        genesis: PathBuf,

        /// Block script JSON file
        #[arg(short, long)]
        blocks: PathBuf,

        /// Write the final state as a genesis file into the data directory
        #[arg(long)]
        export: bool,

        /// Print the metrics after the last block
        #[arg(long)]
        metrics: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::ValidateGenesis { genesis } => {
            let doc = load_genesis(&genesis)?;
            let mut app = App::new(&NodeConfig {
                node: relaymesh_node::config::NodeSettings {
                    chain_id: doc.chain_id.clone(),
                    ..config.node.clone()
                },
                ..config
            })?;
            let updates = app.init_chain(&doc)?;
            println!("genesis ok: chain {}", doc.chain_id);
            println!("  servicers:  {}", doc.app_state.servicers.len());
            println!("  requestors: {}", doc.app_state.requestors.len());
            println!("  validators: {}", updates.len());
            println!("  app hash:   {}", hex::encode(app.app_hash()));
        }

        Commands::Replay {
            genesis,
            blocks,
            export,
            metrics,
        } => {
            let doc = load_genesis(&genesis)?;
            let script = load_script(&blocks)?;
            let mut app = App::new(&config)?;

            tracing::info!(chain_id = %doc.chain_id, blocks = script.blocks.len(), "replaying");
            for block in replay(&mut app, &doc, &script)? {
                println!(
                    "{:>8} {} ok={} failed={} valset={}",
                    block.height,
                    hex::encode(block.app_hash),
                    block.txs_ok,
                    block.txs_failed,
                    block.validator_updates
                );
            }

            if export {
                std::fs::create_dir_all(&config.node.data_dir)?;
                let path = config.node.data_dir.join(format!("genesis-{}.json", app.height()));
                std::fs::write(&path, serde_json::to_string_pretty(&app.export()?)?)?;
                tracing::info!(path = %path.display(), "state exported");
            }
            if metrics {
                if let Some(metrics) = app.metrics() {
                    print!("{}", metrics.render()?);
                }
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
