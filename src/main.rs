use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conductor::cmd;
use conductor::config::Config;
use conductor::orchestrator::Orchestrator;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(version, about = "Coding-agent orchestrator with human approval gates")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "conductor.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator and read operator commands from stdin
    Run,
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Print the parsed configuration
    Show,
    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conductor=info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run => run(&cli.config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let cfg = Config::load(&cli.config)?;
                println!("{}", toml::to_string_pretty(&cfg).context("failed to render config")?);
                Ok(())
            }
            ConfigCommands::Init => {
                if cli.config.exists() {
                    anyhow::bail!("refusing to overwrite {}", cli.config.display());
                }
                std::fs::write(&cli.config, Config::template())
                    .with_context(|| format!("failed to write {}", cli.config.display()))?;
                println!("Wrote {}", cli.config.display());
                Ok(())
            }
        },
    }
}

async fn run(config_path: &PathBuf) -> Result<()> {
    let cfg = Config::load(config_path)?;
    let orchestrator = Orchestrator::from_config(cfg)?;
    orchestrator.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) => line,
                None => break,
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        match cmd::parse(&line) {
            Ok(command) => {
                if !cmd::dispatch(&orchestrator, command).await {
                    break;
                }
            }
            Err(usage) => println!("{usage}"),
        }
    }

    orchestrator.shutdown();
    println!("conductor shutting down");
    Ok(())
}
