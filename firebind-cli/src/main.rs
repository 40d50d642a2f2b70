//! # firebind CLI
//!
//! Developer tool for exercising live documents and collections against the
//! in-memory store.

mod commands;
mod scenario;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "firebind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "firebind.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a YAML scenario and print the resulting views as JSON
    Replay {
        /// Scenario file
        scenario: PathBuf,

        /// Pretty-print the final views
        #[arg(long)]
        pretty: bool,
    },

    /// Encode a point as a geohash
    Geohash {
        /// Latitude in degrees
        #[arg(allow_hyphen_values = true)]
        latitude: f64,

        /// Longitude in degrees
        #[arg(allow_hyphen_values = true)]
        longitude: f64,

        /// Number of characters
        #[arg(long, default_value_t = 9)]
        precision: usize,

        /// Also print the neighbouring cells
        #[arg(long)]
        neighbors: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine readable
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Replay { scenario, pretty } => {
            commands::replay(&cli.config, &scenario, pretty).await
        }
        Commands::Geohash {
            latitude,
            longitude,
            precision,
            neighbors,
        } => commands::geohash(latitude, longitude, precision, neighbors),
    }
}
