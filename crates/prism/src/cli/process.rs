//! The `prism process` command: run local images through the pipeline.
//!
//! Discovered images are submitted in batches of at most
//! `processing.max_batch_items`. Progress events stream to stdout (or
//! `--output`) as NDJSON while a progress bar runs on stderr.

use clap::Args;
use prism_core::{
    BatchRequest, BatchSummary, Config, EventWriter, LocalSource, Prism, ProgressEvent,
    SourceDiscovery, SourceImage, TransformRequest,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Arguments for the `process` command.
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Image files or directories to process
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Built-in preset (web-optimized, thumbnail, social-media, print-quality, gallery)
    #[arg(short, long)]
    pub preset: Option<String>,

    /// Transform option as key=value; repeatable, overrides the preset
    #[arg(short = 'O', long = "option", value_parser = parse_option)]
    pub options: Vec<(String, String)>,

    /// Image to stamp on every output (sets watermark_image)
    #[arg(long)]
    pub watermark_image: Option<PathBuf>,

    /// Images processed at once within a batch
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Write the outputs to a ZIP archive
    #[arg(long)]
    pub zip: Option<PathBuf>,

    /// Write progress events to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Owner recorded on submitted batches
    #[arg(long, env = "PRISM_OWNER", default_value = "local")]
    pub owner: String,
}

/// Running totals across every submitted batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Tally {
    batches: usize,
    succeeded: usize,
    failed: usize,
    cache_hits: usize,
    skipped: usize,
    original_bytes: u64,
    output_bytes: u64,
}

impl Tally {
    fn add(&mut self, summary: &BatchSummary) {
        self.batches += 1;
        self.succeeded += summary.succeeded;
        self.failed += summary.failed;
        self.cache_hits += summary.cache_hits;
        self.original_bytes += summary.original_bytes;
        self.output_bytes += summary.output_bytes;
    }

    fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Execute the process command.
pub async fn execute(args: ProcessArgs, config: Config) -> anyhow::Result<()> {
    let mut fields = transform_fields(args.preset.as_deref(), &args.options)?;

    let paths: Vec<PathBuf> = args.paths.iter().map(|p| expand(p)).collect();
    let sources = SourceDiscovery::new(&config.processing.supported_formats).discover(&paths);
    if sources.is_empty() {
        tracing::warn!("No supported image files found in {:?}", args.paths);
        return Ok(());
    }
    tracing::info!(
        "Found {} image(s), {:.1} MB",
        sources.len(),
        SourceDiscovery::total_size(&sources) as f64 / 1_000_000.0
    );

    let chunk_size = config.processing.max_batch_items.max(1);
    let prism = Prism::new(config)?;
    let coordinator = prism.coordinator();

    if let Some(path) = &args.watermark_image {
        let bytes = tokio::fs::read(expand(path)).await?;
        let uri = coordinator.upload_overlay(bytes).await?;
        fields.insert("watermark_image".to_string(), uri);
    }
    let transform = TransformRequest::from_fields(fields);

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(expand(path))?)),
        None => Box::new(io::stdout()),
    };
    let mut writer = EventWriter::ndjson(sink);

    let progress = create_progress_bar(sources.len() as u64);
    let start_time = Instant::now();
    let mut tally = Tally::default();
    let chunks: Vec<&[LocalSource]> = sources.chunks(chunk_size).collect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    for (index, chunk) in chunks.iter().enumerate() {
        if interrupted {
            break;
        }
        let mut images = Vec::with_capacity(chunk.len());
        for source in chunk.iter() {
            match tokio::fs::read(&source.path).await {
                Ok(bytes) => images.push(SourceImage::inline(source.file_name(), bytes)),
                Err(e) => {
                    tracing::warn!("Skipping {:?}: {}", source.path, e);
                    tally.skipped += 1;
                    progress.inc(1);
                }
            }
        }
        if images.is_empty() {
            continue;
        }

        let ticket = coordinator
            .submit(BatchRequest {
                owner: args.owner.clone(),
                sources: images,
                transform: transform.clone(),
                concurrency: args.concurrency,
            })
            .await?;
        tracing::debug!(batch = %ticket.batch_id, fingerprint = %ticket.fingerprint, "Submitted");

        let mut subscription = coordinator.subscribe(ticket.batch_id)?;
        loop {
            let event = tokio::select! {
                event = subscription.next() => event,
                _ = &mut ctrl_c, if !interrupted => {
                    progress.println("Interrupted: letting running images finish");
                    coordinator.cancel(ticket.batch_id)?;
                    interrupted = true;
                    continue;
                }
            };
            let Some(event) = event else { break };
            writer.write_event(&event)?;
            match &event {
                ProgressEvent::Failed {
                    current_file,
                    error,
                    ..
                } => {
                    progress.inc(1);
                    tracing::debug!("Failed: {} - {}", current_file, error.message);
                }
                ProgressEvent::Completed { .. } => progress.inc(1),
                ProgressEvent::BatchFinished(summary) => tally.add(summary),
                _ => {}
            }
            let elapsed = start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                let rate = writer.items_finished() as f64 / elapsed;
                progress.set_message(format!("{:.1} img/sec", rate));
            }
        }

        if let Some(zip) = &args.zip {
            let path = chunk_zip_path(&expand(zip), index, chunks.len());
            let bytes = coordinator.archive(ticket.batch_id).await?;
            tokio::fs::write(&path, bytes).await?;
            progress.println(format!("Archive written to {}", path.display()));
        }
    }

    writer.flush()?;
    if let Some(path) = &args.output {
        tracing::info!("Events written to {:?}", path);
    }

    progress.finish_and_clear();
    print_summary(&tally, start_time.elapsed());
    Ok(())
}

/// Parse `key=value` from the command line.
fn parse_option(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in `{s}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Form fields equivalent to the preset and options given.
fn transform_fields(
    preset: Option<&str>,
    options: &[(String, String)],
) -> anyhow::Result<BTreeMap<String, String>> {
    if preset.is_none() && options.is_empty() {
        anyhow::bail!("Nothing to do: pass --preset or at least one --option key=value");
    }
    let mut fields = BTreeMap::new();
    if let Some(preset) = preset {
        fields.insert("preset".to_string(), preset.to_string());
    }
    for (key, value) in options {
        if key == "preset" {
            anyhow::bail!("Use --preset to select a preset");
        }
        if let Some(previous) = fields.insert(key.clone(), value.clone()) {
            if previous != *value {
                anyhow::bail!("Option `{key}` given twice with different values");
            }
        }
    }
    Ok(fields)
}

/// Archive path for batch `index` of `total`: the path itself for a single
/// batch, otherwise `name-1.zip`, `name-2.zip`, ...
fn chunk_zip_path(path: &Path, index: usize, total: usize) -> PathBuf {
    if total <= 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prism".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{}.{}", index + 1, ext.to_string_lossy()),
        None => format!("{stem}-{}", index + 1),
    };
    path.with_file_name(name)
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

/// Create a progress bar for batch processing.
fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    )
    .map(|style| style.progress_chars("##-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("starting...");
    pb
}

/// Print a formatted summary table after processing.
fn print_summary(tally: &Tally, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (tally.succeeded + tally.failed) as f64 / secs
    } else {
        0.0
    };
    let saved = tally.original_bytes.saturating_sub(tally.output_bytes);

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Succeeded:    {:>8}", tally.succeeded);
    if tally.failed > 0 {
        eprintln!("    Failed:       {:>8}", tally.failed);
    }
    if tally.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", tally.skipped);
    }
    eprintln!("    Cached:       {:>8}", tally.cache_hits);
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", tally.total());
    if tally.batches > 1 {
        eprintln!("    Batches:      {:>8}", tally.batches);
    }
    eprintln!("    Duration:     {:>7.1}s", secs);
    eprintln!("    Rate:         {:>7.1} img/sec", rate);
    eprintln!("    Input:        {:>7.1} MB", tally.original_bytes as f64 / 1_000_000.0);
    eprintln!("    Output:       {:>7.1} MB", tally.output_bytes as f64 / 1_000_000.0);
    eprintln!("    Saved:        {:>7.1} MB", saved as f64 / 1_000_000.0);
    eprintln!("  ====================================");
}
