//! The `prism metrics` command.
//!
//! Reports what this process can see: the persistent shared tier plus
//! whatever the local run recorded. A long-lived view is served by
//! `GET /api/cache/metrics` on `prism serve`.

use clap::Args;
use prism_core::{Config, EventWriter, MetricsReport, Prism, WriteFormat};
use std::io;

#[derive(Args, Debug)]
pub struct MetricsArgs {
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: MetricsArgs, config: Config) -> anyhow::Result<()> {
    let prism = Prism::new(config)?;
    let report = prism.metrics_report().await;
    if args.json {
        EventWriter::new(io::stdout(), WriteFormat::Json, true).write(&report)?;
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn render(report: &MetricsReport) -> String {
    let s = &report.snapshot;
    let mut out = format!(
        "images {}  succeeded {}  failed {}  cached {}  ({} batches)\n",
        s.total_requests, s.successes, s.failures, s.cache_hits, s.jobs
    );
    out.push_str(&format!(
        "cache hit rate {:.1}% over {} lookups\n",
        report.cache.hit_rate * 100.0,
        report.cache.lookups()
    ));
    if s.avg_processing_ms > 0.0 {
        out.push_str(&format!("avg processing {:.1} ms\n", s.avg_processing_ms));
    }
    for (stage, ms) in &s.avg_stage_ms {
        out.push_str(&format!("  {stage:<10} {ms:>8.1} ms\n"));
    }
    out.push('\n');
    for rec in &report.recommendations {
        out.push_str(&format!("[{:?}] {}: {}\n", rec.priority, rec.title, rec.description));
        if !rec.action.is_empty() {
            out.push_str(&format!("    -> {}\n", rec.action));
        }
    }
    out
}
