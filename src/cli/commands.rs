use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `iris-workspaces` - replay workspace event logs through the snapshot store.
#[derive(Parser, Debug)]
#[command(name = "iris-workspaces")]
#[command(author = "theonlyhennygod")]
#[command(version = "0.1.0")]
#[command(about = "Per-workspace streaming aggregation and snapshot cache.", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed a JSONL event log through the store and print the final states
    Replay {
        /// One `{"workspace_id": ..., "event": {...}}` object per line
        events: PathBuf,

        /// Config file (default: ~/.iris-workspaces/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a config file
    CheckConfig {
        /// Config file (default: ~/.iris-workspaces/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
