//! # relaychat
//!
//! Terminal harness for the relaychat realtime client.
//!
//! ## Commands
//!
//! - `tail`: Connect and print every event until interrupted
//! - `send`: Send one message and wait for the server to confirm it
//! - `status`: Show the effective configuration and try to connect
//!
//! ## Example
//!
//! ```bash
//! export RELAYCHAT_USER=42 RELAYCHAT_TOKEN=eyJ...
//!
//! # Watch everything
//! relaychat --config relaychat.toml tail
//!
//! # Post to a conversation
//! relaychat --endpoint wss://chat.example.com/ws/chat/ send 7 "hello"
//!
//! # Offline demo against the in-memory echo server
//! relaychat --mock send demo "hi"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{send, status, tail};
use config::Settings;

/// Terminal harness for the relaychat realtime client.
#[derive(Parser, Debug)]
#[command(name = "relaychat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client configuration file (TOML)
    #[arg(long, short, global = true, env = "RELAYCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Realtime endpoint; overrides the configuration file
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Logged-in user id
    #[arg(long, global = true, env = "RELAYCHAT_USER")]
    user: Option<String>,

    /// Access token
    #[arg(long, global = true, env = "RELAYCHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Use the in-memory mock transport with an echo server (offline demo)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and print every event until Ctrl-C
    Tail {
        /// Only show events for this conversation
        #[arg(long)]
        chat: Option<String>,
    },

    /// Send a text message and wait for the server to confirm it
    Send {
        /// Conversation id
        chat: String,

        /// Message text
        message: String,

        /// Seconds to wait for the connection and for the confirmation
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Show the effective configuration and try one connection
    Status {
        /// Seconds to wait for the connection
        #[arg(long, default_value = "5")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::resolve(
        cli.config.as_deref(),
        cli.endpoint,
        cli.user,
        cli.token,
        cli.mock,
    )?;

    match cli.command {
        Commands::Tail { chat } => {
            tail::run(settings, chat).await?;
        }
        Commands::Send {
            chat,
            message,
            timeout,
        } => {
            send::run(settings, &chat, &message, Duration::from_secs(timeout)).await?;
        }
        Commands::Status { timeout } => {
            status::run(settings, Duration::from_secs(timeout)).await?;
        }
    }

    Ok(())
}
