// src/aggregate.rs
//! Fold every run artifact into one canonical dataset.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::artifact::{write_canonical, ArtifactLocation, ArtifactProvider, FsArtifactStore};
use crate::config::OutputConfig;
use crate::errors::{AggregateError, ArtifactError};
use crate::model::{count_domains, count_terms, CanonicalDataset, Mention, MentionKey, RunArtifact};
use crate::timeseries;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregate_runs_total", "Run artifacts folded into the canonical set.");
        describe_counter!(
            "aggregate_conflicts_total",
            "Natural-key duplicates whose contents disagreed."
        );
        describe_counter!(
            "aggregate_corrupt_artifacts_total",
            "Artifacts excluded because they could not be read."
        );
        describe_gauge!("aggregate_last_run_ts", "Unix ts when aggregation last ran.");
    });
}

/// Same natural key, different content. The kept record is the one from
/// the earliest run (then smallest run id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationConflict {
    pub key: MentionKey,
    pub kept_run: String,
    pub kept_fingerprint: String,
    pub dropped_run: String,
    pub dropped_fingerprint: String,
}

/// An artifact left out of the fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptArtifact {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationOutcome {
    pub dataset: CanonicalDataset,
    pub conflicts: Vec<AggregationConflict>,
    pub corrupt: Vec<CorruptArtifact>,
    pub runs: usize,
}

struct Kept<'a> {
    mention: &'a Mention,
    run_id: &'a str,
}

/// Pure fold: union, collapse by natural key, recount both tables from the
/// surviving mentions. Order of `artifacts` does not affect the result.
pub fn fold_artifacts(artifacts: &[RunArtifact]) -> (CanonicalDataset, Vec<AggregationConflict>) {
    let mut by_key: BTreeMap<MentionKey, Kept> = BTreeMap::new();
    let mut conflicts = Vec::new();

    let mut ordered: Vec<&RunArtifact> = artifacts.iter().collect();
    ordered.sort_by(|a, b| {
        a.manifest
            .created_at
            .cmp(&b.manifest.created_at)
            .then_with(|| a.manifest.run_id.cmp(&b.manifest.run_id))
    });

    for art in ordered {
        for m in &art.mentions {
            let candidate = Kept {
                mention: m,
                run_id: &art.manifest.run_id,
            };
            match by_key.get(&m.key()) {
                None => {
                    by_key.insert(m.key(), candidate);
                }
                // runs are visited oldest first, so the record already held wins
                Some(kept) => {
                    if kept.mention != candidate.mention {
                        conflicts.push(AggregationConflict {
                            key: m.key(),
                            kept_run: kept.run_id.to_string(),
                            kept_fingerprint: kept.mention.content_fingerprint(),
                            dropped_run: candidate.run_id.to_string(),
                            dropped_fingerprint: candidate.mention.content_fingerprint(),
                        });
                    }
                }
            }
        }
    }

    let mentions: Vec<Mention> = by_key.into_values().map(|k| k.mention.clone()).collect();
    let dataset = CanonicalDataset {
        cooccurrences: count_terms(&mentions),
        domains: count_domains(&mentions),
        mentions,
    };
    (dataset, conflicts)
}

/// Load everything `provider` lists, skip what cannot be read, fold the rest.
pub fn aggregate<P>(provider: &P) -> Result<AggregationOutcome, AggregateError>
where
    P: ArtifactProvider + ?Sized,
{
    ensure_metrics_described();
    let listed: Vec<ArtifactLocation> = provider.list()?;
    if listed.is_empty() {
        return Err(AggregateError::NoArtifacts);
    }

    let mut loaded = Vec::with_capacity(listed.len());
    let mut corrupt = Vec::new();
    for loc in &listed {
        match provider.load(loc) {
            Ok(a) => loaded.push(a),
            Err(e @ ArtifactError::Corrupt { .. }) => {
                tracing::warn!(target: "aggregate", artifact = %loc.id, error = %e, "excluding corrupt artifact");
                counter!("aggregate_corrupt_artifacts_total").increment(1);
                corrupt.push(CorruptArtifact {
                    id: loc.id.clone(),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        }
    }
    if loaded.is_empty() {
        return Err(AggregateError::NoReadableArtifacts {
            found: listed.len(),
        });
    }

    let (dataset, conflicts) = fold_artifacts(&loaded);
    for c in &conflicts {
        tracing::warn!(
            target: "aggregate",
            date = %c.key.date,
            url = %c.key.url,
            keyword = %c.key.keyword,
            kept = %c.kept_run,
            dropped = %c.dropped_run,
            "conflicting duplicate mention"
        );
    }
    counter!("aggregate_runs_total").increment(loaded.len() as u64);
    counter!("aggregate_conflicts_total").increment(conflicts.len() as u64);
    gauge!("aggregate_last_run_ts").set(Utc::now().timestamp() as f64);
    tracing::info!(
        target: "aggregate",
        runs = loaded.len(),
        corrupt = corrupt.len(),
        mentions = dataset.mentions.len(),
        terms = dataset.cooccurrences.len(),
        domains = dataset.domains.len(),
        conflicts = conflicts.len(),
        "aggregation finished"
    );

    Ok(AggregationOutcome {
        dataset,
        conflicts,
        corrupt,
        runs: loaded.len(),
    })
}

/// Aggregate `<output_dir>/raw` and replace the canonical files in `output_dir`.
pub fn aggregate_output_dir(
    output_dir: &Path,
    cfg: &OutputConfig,
) -> Result<AggregationOutcome, AggregateError> {
    let store = FsArtifactStore::under_output(output_dir);
    let outcome = aggregate(&store)?;
    let series = timeseries::build(&outcome.dataset.mentions, cfg.smoothing_window);
    write_canonical(output_dir, &outcome.dataset, &series, cfg.word_cloud_max_words)?;
    tracing::info!(target: "aggregate", dir = %output_dir.display(), "canonical files written");
    Ok(outcome)
}
