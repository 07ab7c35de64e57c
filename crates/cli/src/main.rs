//! MeetChat - chat with the meeting scheduling agent from the terminal.
//!
//! This tool can:
//! - Chat with the agent over iroh, or against a local simulation
//! - Host an agent endpoint for other clients
//! - Show status and configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// MeetChat - terminal client for the scheduling agent
#[derive(Parser)]
#[command(name = "meetchat")]
#[command(about = "Chat with the meeting scheduling agent", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Never touch the network; replies are simulated
        #[arg(long)]
        offline: bool,

        /// Connect without a local identity (always simulated)
        #[arg(long)]
        guest: bool,

        /// Talk to an in-process agent over the live wire protocol
        #[arg(long, conflicts_with = "offline")]
        loopback: bool,
    },

    /// Host an agent endpoint
    Agent {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Only welcome these client addresses (repeatable)
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Pause before each reply, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },

    /// Show identity, paths and configuration status
    Status,

    /// Show or modify configuration
    Config {
        /// Key to get or set
        key: Option<String>,
        /// Value to set
        value: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Chat {
            config,
            offline,
            guest,
            loopback,
        } => commands::chat::execute(config, offline, guest, loopback).await,
        Commands::Agent {
            config,
            allow,
            delay_ms,
        } => commands::agent::execute(config, allow, delay_ms).await,
        Commands::Status => commands::status::execute().await,
        Commands::Config { key, value } => commands::config::execute(key, value).await,
    }
}
