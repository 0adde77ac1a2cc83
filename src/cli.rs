// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Session broker: brokers interactive coding-agent sessions between a
/// browser client and ephemeral remote sandboxes.
#[derive(Parser, Debug)]
#[command(name = "broker", version, about)]
pub struct Cli {
    /// Explicit config file, merged on top of the layered search path.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug-level) logging regardless of `RUST_LOG`.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP/WebSocket gateway.
    Serve,
    /// Print the fully merged configuration as YAML and exit.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the merged config.
    Print,
}
