mod cli;
mod commands;
mod terminal;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use warden_core::{Config, NoConfirmer};

use crate::cli::{Cli, Commands};
use crate::terminal::TerminalConfirmer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config_path = resolve_config_path(cli.config.clone());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    tracing::debug!(path = %config_path.display(), "configuration loaded");

    let output = match cli.command {
        Commands::Classify { tools } => commands::classify(&config, &tools),
        Commands::Check {
            server,
            tool,
            args,
            ask,
        } => {
            if ask {
                commands::check(&config, &server, &tool, &args, Some(TerminalConfirmer)).await?
            } else {
                commands::check(&config, &server, &tool, &args, None::<NoConfirmer>).await?
            }
        }
        Commands::Audit {
            month,
            server,
            list,
        } => commands::audit(&config, month, server.as_deref(), list).await?,
        Commands::Config => commands::show_config(&config)?,
    };

    println!("{output}");
    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }
    if let Ok(path) = std::env::var("WARDEN_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
