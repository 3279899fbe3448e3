// src/ingest/mod.rs
pub mod providers;
pub mod retry;
pub mod types;
pub mod walker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;

use crate::accumulate::RunAccumulator;
use crate::artifact::FsArtifactStore;
use crate::config::TrackerConfig;
use crate::errors::IngestError;
use crate::extract::WindowExtractor;
use crate::ingest::retry::RetryPolicy;
use crate::ingest::types::NGramFeed;
use crate::ingest::walker::{BucketOutcome, BucketWalker};
use crate::model::RunArtifact;
use crate::normalize::NormalizationEngine;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_buckets_total", "Buckets fetched and processed.");
        describe_counter!(
            "ingest_buckets_unavailable_total",
            "Buckets skipped after exhausting retries."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Transient fetch failures that were retried."
        );
        describe_counter!(
            "ingest_rate_limited_total",
            "Rate-limit responses from the feed."
        );
        describe_counter!(
            "ingest_malformed_records_total",
            "Window records skipped as malformed."
        );
        describe_counter!("ingest_matches_total", "Keyword matches before de-duplication.");
        describe_histogram!("ingest_fetch_ms", "Bucket fetch time in milliseconds.");
        describe_gauge!("ingest_last_run_ts", "Unix ts when an ingest run last finished.");
    });
}

/// Host part of an article URL, lowercased. `None` when nothing usable is there.
pub fn domain_of(url: &str) -> Option<String> {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(host) = parsed.host_str() {
            return Some(host.trim_end_matches('.').to_ascii_lowercase());
        }
    }
    // scheme-less or otherwise odd URLs: take what sits before the first '/'
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Empty allow-list keeps everything. Otherwise the domain must equal an
/// entry or be a subdomain of one (case-insensitive).
pub fn is_allowed_domain<S: AsRef<str>>(domain: S, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    let d = domain.as_ref().to_ascii_lowercase();
    allowlist.iter().any(|w| {
        let w = w.to_ascii_lowercase();
        d == w || d.ends_with(&format!(".{w}"))
    })
}

/// Knobs of one run that are not part of the tracker configuration.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Operator stop flag, checked between buckets.
    pub stop: Option<Arc<AtomicBool>>,
    /// Skip the first N buckets of the range (resume).
    pub resume_from: u64,
}

/// Walk `start..=end`, extract and accumulate every bucket, and return the
/// run's artifact. Unavailable buckets and bad records are counted, not fatal.
///
/// Fails with [`IngestError::SourceUnreachable`] when the range was walked in
/// full and not a single bucket could be fetched.
pub async fn run_ingest(
    feed: &dyn NGramFeed,
    cfg: &TrackerConfig,
    start: NaiveDate,
    end: NaiveDate,
    opts: IngestOptions,
) -> Result<RunArtifact, IngestError> {
    ensure_metrics_described();
    if start > end {
        return Err(IngestError::InvalidRange { start, end });
    }

    let engine = NormalizationEngine::new(&cfg.normalization);
    let extractor = WindowExtractor::new(&engine, cfg);

    let mut walker = BucketWalker::new(
        feed,
        start,
        end,
        &cfg.feed.hours,
        RetryPolicy::from(&cfg.retry),
    )
    .starting_at(opts.resume_from)
    .min_request_interval(Duration::from_millis(cfg.feed.min_request_interval_ms));
    if let Some(flag) = opts.stop.clone() {
        walker = walker.with_stop_flag(flag);
    }

    let mut acc = RunAccumulator::new(start, end, extractor.keywords(), walker.len());
    tracing::info!(
        target: "ingest",
        provider = feed.name(),
        %start,
        %end,
        buckets = walker.len(),
        resume_from = walker.position(),
        "starting ingest run"
    );

    let mut walked = 0u64;
    while let Some(outcome) = walker.next_bucket().await {
        walked += 1;
        match outcome {
            BucketOutcome::Fetched(payload) => {
                let out = extractor.extract(&payload);
                counter!("ingest_buckets_total").increment(1);
                counter!("ingest_malformed_records_total").increment(out.malformed);
                counter!("ingest_matches_total").increment(out.matches.len() as u64);
                tracing::debug!(
                    target: "ingest",
                    bucket = %payload.bucket,
                    records = out.records,
                    matches = out.matches.len(),
                    malformed = out.malformed,
                    "bucket processed"
                );
                acc.record_bucket(out);
            }
            BucketOutcome::Unavailable(unavailable) => {
                counter!("ingest_buckets_unavailable_total").increment(1);
                acc.record_unavailable(&unavailable);
            }
        }

        if walked % cfg.output.progress_every.max(1) == 0 {
            let p = acc.progress();
            tracing::info!(
                target: "ingest",
                position = walker.position(),
                of = walker.len(),
                processed = p.buckets_processed,
                unavailable = p.buckets_unavailable,
                mentions = p.mentions,
                "checkpoint"
            );
        }
    }

    let stopped_early = walker.stopped() && walker.position() < walker.len();
    let stats = acc.progress();
    if walked > 0 && stats.buckets_processed == 0 && !stopped_early {
        return Err(IngestError::SourceUnreachable {
            unavailable: stats.buckets_unavailable,
        });
    }

    let now = Utc::now();
    gauge!("ingest_last_run_ts").set(now.timestamp() as f64);
    let artifact = acc.finish(now, stopped_early);
    let s = &artifact.manifest.stats;
    if artifact.is_empty() {
        tracing::info!(target: "ingest", run = %artifact.manifest.run_id, "run found no mentions");
    }
    tracing::info!(
        target: "ingest",
        run = %artifact.manifest.run_id,
        processed = s.buckets_processed,
        unavailable = s.buckets_unavailable,
        records = s.records_seen,
        malformed = s.malformed_records,
        filtered = s.filtered_records,
        matches = s.matches_found,
        duplicates = s.duplicate_matches,
        mentions = s.mentions,
        stopped_early = s.stopped_early,
        "ingest run finished"
    );
    Ok(artifact)
}

/// [`run_ingest`] then publish the artifact into `store`. Nothing is written
/// when the run fails.
pub async fn ingest_and_persist(
    feed: &dyn NGramFeed,
    cfg: &TrackerConfig,
    start: NaiveDate,
    end: NaiveDate,
    store: &FsArtifactStore,
    opts: IngestOptions,
) -> Result<(RunArtifact, std::path::PathBuf), IngestError> {
    let artifact = run_ingest(feed, cfg, start, end, opts).await?;
    let dir = store.write_run(&artifact)?;
    tracing::info!(target: "ingest", dir = %dir.display(), "run artifact published");
    Ok((artifact, dir))
}
