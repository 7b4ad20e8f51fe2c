//! The `prism cache` command.

use clap::{Args, Subcommand};
use prism_core::cache::TierStats;
use prism_core::{CacheStats, Config, EventWriter, Prism, WriteFormat};
use std::io;

/// Arguments for the `cache` command.
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show tier sizes and hit/miss counters
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Remove cached results
    Clear {
        /// Key prefix to clear, e.g. `transform:<source hash>`; everything if omitted
        #[arg(long)]
        scope: Option<String>,
    },
}

pub async fn execute(args: CacheArgs, config: Config) -> anyhow::Result<()> {
    let prism = Prism::new(config)?;
    let cache = prism.coordinator().cache();

    match args.command {
        CacheCommand::Stats { json } => {
            let stats = cache.stats().await;
            if json {
                EventWriter::new(io::stdout(), WriteFormat::Json, true).write(&stats)?;
            } else {
                print!("{}", render_stats(&stats));
            }
        }
        CacheCommand::Clear { scope } => {
            let report = cache.clear(scope.as_deref()).await;
            println!(
                "Removed {} entries ({} local, {} shared)",
                report.total(),
                report.local_removed,
                report.shared_removed
            );
        }
    }
    Ok(())
}

fn render_stats(stats: &CacheStats) -> String {
    let mut out = String::new();
    out.push_str(&tier_line("local", stats.local));
    out.push_str(&tier_line("shared", stats.shared));
    out.push_str(&format!(
        "lookups   {:>8}  hits {} / misses {} ({:.1}% hit rate)\n",
        stats.lookups(),
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    ));
    if stats.shared_errors > 0 || stats.stale > 0 {
        out.push_str(&format!(
            "problems  shared errors {}, stale entries {}\n",
            stats.shared_errors, stats.stale
        ));
    }
    out
}

fn tier_line(name: &str, tier: Option<TierStats>) -> String {
    match tier {
        Some(t) => format!(
            "{name:<9} {:>8} entries  {:>8.1} MB  {} evictions\n",
            t.entries,
            t.bytes as f64 / 1_000_000.0,
            t.evictions
        ),
        None => format!("{name:<9} disabled\n"),
    }
}
