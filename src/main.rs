mod cli;
mod service;

use anyhow::Result;
use clap::Parser;
use presenti_core::Config;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::ConfigSample { output }) = &cli.command {
        let path = output
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("./presenti.sample.toml"));
        Config::sample().save(&path)?;
        println!("Sample configuration written to {:?}", path);
        return Ok(());
    }

    let config = match &cli.config_path {
        Some(path) => Some(Config::load(path)?),
        None => None,
    };
    let loaded_from_file = config.is_some();
    let config = config.unwrap_or_default();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    if !loaded_from_file {
        info!("No config file given, using defaults");
    }

    match cli.command {
        None | Some(Commands::Run) => service::run(config).await,
        Some(Commands::ConfigSample { .. }) => Ok(()),
    }
}
