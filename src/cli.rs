//! # Command-Line Interface Module
//!
//! Argument parsing for the `replichat` binary's two modes:
//! `server <host> <port>` binds a configured replica; `client <host>
//! <port>` connects to one (typically the primary).

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, Subcommand,
};
use std::path::PathBuf;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// replichat — a chain-replicated chat service.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the chain config file.
    #[arg(long, global = true, default_value = "replichat.config.json")]
    pub config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write detailed logs here instead of a daily-rotated file; "stderr" logs to stderr.
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Suppress the colorized stdout summary layer.
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Bind and serve a replica at `(host, port)`; the address must
    /// appear in the chain config.
    Server { host: String, port: u16 },
    /// Connect as a client to `(host, port)`, typically the primary.
    Client { host: String, port: u16 },
}
