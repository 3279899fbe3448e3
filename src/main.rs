//! Uncertainty Tracker: binary entrypoint
//! `ingest` walks the GDELT web n-gram feed for a date range and publishes a
//! run artifact; `aggregate` folds every run into the canonical files;
//! `timeseries` prints the smoothed daily series; `serve` exposes the read API.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use metrics::gauge;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use uncertainty_tracker::aggregate::aggregate_output_dir;
use uncertainty_tracker::api::{create_router, AppState};
use uncertainty_tracker::artifact::{load_canonical_mentions, FsArtifactStore};
use uncertainty_tracker::config::{clean_list, TrackerConfig};
use uncertainty_tracker::ingest::providers::gdelt::GdeltProvider;
use uncertainty_tracker::ingest::{ingest_and_persist, IngestOptions};
use uncertainty_tracker::metrics::{snapshot_router, Metrics};
use uncertainty_tracker::model::RunArtifact;
use uncertainty_tracker::timeseries;

const DEFAULT_DAYS: u64 = 30;

/// Track "uncertainty" mentions across the GDELT web n-gram feed
#[derive(Parser, Debug)]
#[command(name = "uncertainty-tracker", version)]
struct Cli {
    /// Tracker config (TOML or JSON); falls back to $TRACKER_CONFIG_PATH and config/
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines instead of compact text
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a date range and publish one run artifact
    Ingest(IngestArgs),
    /// Fold all run artifacts into the canonical output files
    Aggregate {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the daily series computed from the canonical mentions
    Timeseries {
        /// Trailing moving-average window in points
        #[arg(long)]
        window: Option<usize>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Serve the read-only HTTP API over the canonical files
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// First day (YYYY-MM-DD)
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD), clamped to yesterday
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Number of days ending at the end date
    #[arg(long, conflicts_with = "start_date")]
    days: Option<u64>,

    /// Comma-separated keywords, overriding the config
    #[arg(long, value_delimiter = ',')]
    keywords: Option<Vec<String>>,

    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip the first N buckets of the range
    #[arg(long, default_value = "0")]
    resume_from: u64,

    /// Publish the run artifact only; leave the canonical files alone
    #[arg(long)]
    skip_aggregate: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("uncertainty_tracker=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Resolve the ingest range against `today`: the end defaults to and is
/// clamped at yesterday; the start defaults to `days` (30) days ending there.
fn resolve_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    days: Option<u64>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate)> {
    let yesterday = today
        .checked_sub_days(Days::new(1))
        .context("no day before today")?;
    let end = match end {
        Some(e) if e > yesterday => {
            tracing::warn!(requested = %e, clamped = %yesterday, "end date is not complete yet; clamping");
            yesterday
        }
        Some(e) => e,
        None => yesterday,
    };
    let start = match start {
        Some(s) => s,
        None => {
            let n = days.unwrap_or(DEFAULT_DAYS).max(1);
            end.checked_sub_days(Days::new(n - 1))
                .context("start date out of range")?
        }
    };
    if start > end {
        bail!("start date {start} is after end date {end}");
    }
    Ok((start, end))
}

fn output_dir(cfg: &TrackerConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| cfg.output.dir.clone())
}

fn print_summary(artifact: &RunArtifact, dir: &Path) {
    let s = &artifact.manifest.stats;
    println!("run {} -> {}", artifact.manifest.run_id, dir.display());
    println!(
        "  buckets: {} processed, {} unavailable of {}",
        s.buckets_processed, s.buckets_unavailable, s.buckets_total
    );
    println!("  total mentions: {}", s.mentions);
    println!("  top domains:");
    for d in artifact.domains.iter().take(5) {
        println!("    {:<40} {}", d.domain, d.mention_count);
    }
    println!("  top co-occurring terms:");
    for t in artifact.cooccurrences.iter().take(5) {
        println!("    {:<40} {}", t.term, t.frequency);
    }
}

async fn run_ingest_cmd(mut cfg: TrackerConfig, args: IngestArgs) -> Result<()> {
    if let Some(k) = args.keywords {
        let cleaned = clean_list(k);
        if !cleaned.is_empty() {
            cfg.keywords = cleaned;
        }
    }
    let today = Utc::now().date_naive();
    let (start, end) = resolve_range(args.start_date, args.end_date, args.days, today)?;
    let out_dir = output_dir(&cfg, args.output);

    let feed = GdeltProvider::from_config(&cfg.feed)?;
    let store = FsArtifactStore::under_output(&out_dir);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; finishing the current bucket");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let opts = IngestOptions {
        stop: Some(stop),
        resume_from: args.resume_from,
    };
    let (artifact, dir) = ingest_and_persist(&feed, &cfg, start, end, &store, opts)
        .await
        .context("ingest run failed")?;
    print_summary(&artifact, &dir);

    if !args.skip_aggregate {
        let outcome = aggregate_output_dir(&out_dir, &cfg.output).context("aggregation failed")?;
        println!(
            "canonical dataset: {} mentions from {} run(s), {} conflict(s)",
            outcome.dataset.mentions.len(),
            outcome.runs,
            outcome.conflicts.len()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let cfg = TrackerConfig::load(cli.config.as_deref()).context("loading tracker config")?;
    let metrics = Metrics::install()?;

    match cli.command {
        Command::Ingest(args) => {
            let dir = output_dir(&cfg, args.output.clone());
            // failed runs still leave their counters behind
            let result = run_ingest_cmd(cfg, args).await;
            let snap = metrics.write_snapshot(&dir, "ingest")?;
            tracing::info!(path = %snap.display(), "metrics snapshot written");
            result
        }
        Command::Aggregate { output } => {
            let dir = output_dir(&cfg, output);
            let outcome = aggregate_output_dir(&dir, &cfg.output).context("aggregation failed")?;
            metrics.write_snapshot(&dir, "aggregate")?;
            for c in &outcome.corrupt {
                eprintln!("excluded corrupt artifact {}: {}", c.id, c.reason);
            }
            println!(
                "{} mentions, {} terms, {} domains from {} run(s); {} conflict(s)",
                outcome.dataset.mentions.len(),
                outcome.dataset.cooccurrences.len(),
                outcome.dataset.domains.len(),
                outcome.runs,
                outcome.conflicts.len()
            );
            Ok(())
        }
        Command::Timeseries { window, output } => {
            let dir = output_dir(&cfg, output);
            let mentions = load_canonical_mentions(&dir)
                .with_context(|| format!("reading canonical mentions in {}", dir.display()))?;
            let series = timeseries::build(&mentions, window.unwrap_or(cfg.output.smoothing_window));
            println!("{}", serde_json::to_string_pretty(&series)?);
            Ok(())
        }
        Command::Serve { addr, output } => {
            let dir = output_dir(&cfg, output);
            gauge!("api_default_smoothing_window").set(cfg.output.smoothing_window as f64);
            let router = create_router(AppState::new(dir.clone(), cfg.output.smoothing_window))
                .merge(metrics.router())
                .merge(snapshot_router(dir));

            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("binding {addr}"))?;
            tracing::info!(%addr, "serving read API");
            axum::serve(listener, router).await.context("http server")?;
            Ok(())
        }
    }
}
