use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version, about = "ChatRelay - Debounced chat relay to a language model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.chatrelay/config.toml)
    #[arg(long, global = true, env = "CHATRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Relay stdin lines of the form `<identity>: <text>` to the model
    Run(RunArgs),

    /// Print the persisted conversation of an identity (read-only)
    History(HistoryArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
pub struct RunArgs {
    /// Identity used for lines without an `<identity>:` prefix
    #[arg(long, default_value = "console")]
    pub identity: String,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Identity key of the conversation
    pub identity: String,

    /// Print raw JSON records
    #[arg(long)]
    pub json: bool,
}
