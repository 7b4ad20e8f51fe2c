//! Prism CLI - batch image transformation with a content-addressed result cache.
//!
//! Prism resizes, re-encodes, watermarks, and thumbnails batches of images.
//! Results are cached by source content and transform, so repeating a
//! transform on the same bytes never touches a codec twice.
//!
//! # Usage
//!
//! ```bash
//! # Optimize a directory of photos for the web
//! prism process ./photos/ --preset web-optimized --zip web.zip
//!
//! # Explicit options, events to a file
//! prism process a.jpg b.png --option width=800 --option format=webp --output events.jsonl
//!
//! # Inspect the cache
//! prism cache stats
//!
//! # Run the HTTP API
//! prism serve --bind 0.0.0.0:8080
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;
mod server;

/// Prism - batch image transformation pipeline.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "PRISM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Transform images as one or more batches
    Process(cli::process::ProcessArgs),

    /// Inspect or clear the result cache
    Cache(cli::cache::CacheArgs),

    /// Show metrics and optimization recommendations
    Metrics(cli::metrics::MetricsArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),

    /// Run the HTTP API
    Serve(cli::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so config warnings go through eprintln.
    let loaded = match &cli.config {
        Some(path) => prism_core::Config::load_from(path),
        None => prism_core::Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Using default configuration. Check your config file with `prism config path`."
            );
            prism_core::Config::default()
        }
    };
    logging::init_from_config(&config, cli.verbose, cli.json_logs);

    tracing::debug!("Prism v{}", prism_core::VERSION);

    match cli.command {
        Commands::Process(args) => cli::process::execute(args, config).await,
        Commands::Cache(args) => cli::cache::execute(args, config).await,
        Commands::Metrics(args) => cli::metrics::execute(args, config).await,
        Commands::Config(args) => cli::config::execute(args, cli.config.as_deref()).await,
        Commands::Serve(args) => cli::serve::execute(args, config).await,
    }
}
