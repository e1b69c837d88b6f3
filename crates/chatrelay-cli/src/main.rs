mod cli;
mod commands;
mod console;
mod logging;

use anyhow::Result;
use chatrelay_core::RelayConfig;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init_logging(cli.verbose)?;
    let config = RelayConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::run(&config, args).await,
        Commands::History(args) => commands::history::run(&config, args).await,
        Commands::Config => commands::config::run(&config),
    }
}
