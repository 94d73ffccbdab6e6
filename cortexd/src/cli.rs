use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cortexd", version, about = "Cortex scheduling daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the daemon with a config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
}
