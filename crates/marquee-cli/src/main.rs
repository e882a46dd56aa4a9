//! Marquee CLI - Headless player harness
//!
//! Features:
//! - Play a URI over the simulated engine and print every signal
//! - Probe a URI for its stream topology
//! - Dump the effective player configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Marquee CLI - Playback core harness
#[derive(Parser)]
#[command(name = "marquee")]
#[command(author = "Marquee Contributors")]
#[command(version)]
#[command(about = "Drive a Marquee player and inspect its signals", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Player configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a URI until it stops and print every signal
    Play {
        /// URI or local path (e.g. sim://audio, sim://audio-video?tick_ms=5)
        uri: String,

        /// Deliver signals through a main context task
        #[arg(long)]
        main_context: bool,

        /// Minimum spacing of position signals in milliseconds
        #[arg(long)]
        position_interval: Option<u64>,

        /// Seek to this position (milliseconds) before starting
        #[arg(long)]
        seek: Option<u64>,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "30")]
        timeout: u64,
    },

    /// Resolve a URI and print its media info
    Probe {
        /// URI or local path
        uri: String,

        /// Give up after this many seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Print the effective player configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    marquee_core::init();

    let mut config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Play {
            uri,
            main_context,
            position_interval,
            seek,
            timeout,
        } => {
            if main_context {
                config.dispatch_to_main_context = true;
            }
            if let Some(ms) = position_interval {
                config.position_update_interval_ms = ms;
            }
            commands::play(&uri, config, seek, timeout, &cli.format).await?;
        }
        Commands::Probe { uri, timeout } => {
            commands::probe(&uri, config, timeout, &cli.format).await?;
        }
        Commands::Config => {
            println!("{}", output::format_output(&config, &cli.format));
        }
    }

    Ok(())
}
