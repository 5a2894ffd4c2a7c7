// hopmesh: mesh simulator and config tool
//
// Runs hopmesh-core nodes in-process over the memory transport.

mod config;
mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use simulate::{SimulationOptions, Topology};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hopmesh")]
#[command(about = "HopMesh: multi-hop proximity mesh simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an in-process mesh and route a message across it
    Simulate {
        #[arg(short, long, default_value = "5")]
        nodes: usize,
        #[arg(short, long, value_enum, default_value = "chain")]
        topology: Topology,
        /// Seconds to wait for each stage before giving up
        #[arg(long, default_value = "60")]
        timeout: u64,
        #[arg(short, long, default_value = "hello across the mesh")]
        message: String,
    },
    /// Inspect or create the mesh config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::config_file()?,
    };

    match cli.command {
        Commands::Simulate {
            nodes,
            topology,
            timeout,
            message,
        } => {
            let options = SimulationOptions {
                nodes,
                topology,
                timeout: Duration::from_secs(timeout),
                message,
            };
            cmd_simulate(&config_path, options).await
        }
        Commands::Config { action } => cmd_config(&config_path, action),
    }
}

async fn cmd_simulate(config_path: &Path, options: SimulationOptions) -> Result<()> {
    let base = config::load_or_default(config_path)?;
    let report = simulate::run(&options, &base).await?;

    println!();
    if report.converged && report.delivered {
        println!("{}", "Simulation complete".green().bold());
    } else {
        anyhow::bail!("Simulation finished with errors");
    }
    Ok(())
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let config = config::load_or_default(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
                return Ok(());
            }

            println!("{}", "Mesh Configuration".bold());
            println!("  File: {}", config_path.display().to_string().dimmed());
            println!();
            for (key, value) in config::entries(&config) {
                println!("  {:<26} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Init { force } => {
            if config::init(config_path, force)? {
                println!(
                    "{} Wrote default config to {}",
                    "✓".green(),
                    config_path.display().to_string().bright_cyan()
                );
            } else {
                println!(
                    "{} Config already exists at {} (use --force to overwrite)",
                    "•".bright_yellow(),
                    config_path.display()
                );
            }
        }
    }

    Ok(())
}
