//! Marquee CLI - Headless Playback Simulator
//!
//! Features:
//! - Source type resolution
//! - Config validation and inspection
//! - Mid-roll placement planning
//! - Full session simulation over scripted surfaces

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;

/// Marquee CLI - Playback orchestration toolkit
#[derive(Parser)]
#[command(name = "marquee-cli")]
#[command(version)]
#[command(about = "Playback orchestration simulator and config tooling", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the stream type of a source URL
    Resolve {
        /// Source URL or path
        source: String,

        /// Protocol hint (hls, dash, mp4, youtube, other)
        #[arg(long)]
        hint: Option<String>,
    },

    /// Validate a player config file and print a summary
    Inspect {
        /// Path to a JSON player config
        config: PathBuf,
    },

    /// Plan mid-roll placement for a config against a content duration
    Plan {
        /// Path to a JSON player config
        config: PathBuf,

        /// Content duration in seconds
        #[arg(short, long, default_value = "600")]
        duration: f64,
    },

    /// Run a simulated playback session from a config
    Run {
        /// Path to a JSON player config
        config: PathBuf,

        /// Content duration in seconds
        #[arg(short, long, default_value = "120")]
        duration: f64,

        /// Reject unmuted autoplay like a restrictive browser
        #[arg(long)]
        strict_autoplay: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .init();

    match cli.command {
        Commands::Resolve { source, hint } => {
            commands::resolve(&source, hint.as_deref(), &cli.format)?;
        }
        Commands::Inspect { config } => {
            commands::inspect(&config, &cli.format)?;
        }
        Commands::Plan { config, duration } => {
            commands::plan(&config, duration, &cli.format)?;
        }
        Commands::Run {
            config,
            duration,
            strict_autoplay,
        } => {
            commands::run(&config, duration, strict_autoplay).await?;
        }
    }

    Ok(())
}
