// tests/e2e_overlapping_runs.rs
//
// Two ingest runs with overlapping ranges both see the same article; the
// canonical dataset must hold it once, and re-aggregating must not change a
// single byte of the canonical files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use uncertainty_tracker::aggregate::aggregate_output_dir;
use uncertainty_tracker::artifact::{
    ArtifactProvider, FsArtifactStore, CANONICAL_COOCCURRENCES, CANONICAL_DOMAINS,
    CANONICAL_MENTIONS, CANONICAL_TIMESERIES, CANONICAL_WORD_CLOUD,
};
use uncertainty_tracker::config::TrackerConfig;
use uncertainty_tracker::ingest::providers::gdelt::GdeltProvider;
use uncertainty_tracker::ingest::types::Bucket;
use uncertainty_tracker::ingest::{ingest_and_persist, IngestOptions};

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}

fn cfg() -> TrackerConfig {
    let mut c = TrackerConfig::default();
    c.feed.hours = vec![0];
    c.retry.base_delay_ms = 0;
    c.retry.max_delay_ms = 0;
    // keep surface forms so the shared term reads back as written
    c.normalization.equivalences = BTreeMap::new();
    c.sanitized()
}

fn feed() -> GdeltProvider {
    let line = serde_json::json!({
        "date": "2025-01-12T00:01:00Z",
        "ngram": "uncertainty",
        "lang": "en",
        "type": 1,
        "pos": 3,
        "pre": "the tariff",
        "post": "",
        "url": "https://example.com/markets/2025/01/12/outlook",
    });
    GdeltProvider::from_fixtures(vec![(Bucket::new(d(12), 0), format!("{line}\n"))])
}

fn canonical_bytes(dir: &Path) -> Vec<Vec<u8>> {
    [
        CANONICAL_MENTIONS,
        CANONICAL_COOCCURRENCES,
        CANONICAL_WORD_CLOUD,
        CANONICAL_DOMAINS,
        CANONICAL_TIMESERIES,
    ]
    .iter()
    .map(|f| fs::read(dir.join(f)).expect("canonical file"))
    .collect()
}

#[tokio::test]
async fn overlapping_runs_fold_into_one_mention() {
    let c = cfg();
    let f = feed();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path();
    let store = FsArtifactStore::under_output(out);

    let (first, _) = ingest_and_persist(&f, &c, d(1), d(15), &store, IngestOptions::default())
        .await
        .expect("first run");
    let (second, _) = ingest_and_persist(&f, &c, d(10), d(31), &store, IngestOptions::default())
        .await
        .expect("second run");
    assert_eq!(first.mentions.len(), 1);
    assert_eq!(second.mentions.len(), 1);
    assert_eq!(first.manifest.stats.buckets_unavailable, 14);
    assert_eq!(store.list().unwrap().len(), 2);

    let outcome = aggregate_output_dir(out, &c.output).expect("aggregate");
    let ds = &outcome.dataset;
    assert_eq!(outcome.runs, 2);
    assert!(outcome.conflicts.is_empty());
    assert_eq!(ds.mentions.len(), 1);
    assert_eq!(ds.mentions[0].date, d(12));

    assert_eq!(ds.cooccurrences.len(), 1);
    assert_eq!(ds.cooccurrences[0].term, "tariff");
    assert_eq!(ds.cooccurrences[0].frequency, 1);

    assert_eq!(ds.domains.len(), 1);
    assert_eq!(ds.domains[0].domain, "example.com");
    assert_eq!(ds.domains[0].mention_count, 1);

    let before = canonical_bytes(out);
    aggregate_output_dir(out, &c.output).expect("aggregate again");
    assert_eq!(before, canonical_bytes(out), "canonical files must be byte-identical");

    let csv = fs::read_to_string(out.join(CANONICAL_COOCCURRENCES)).unwrap();
    assert_eq!(csv, "word,co_occurrences_with_uncertainty\ntariff,1\n");
}

#[tokio::test]
async fn corrupt_run_is_excluded_from_the_fold() {
    let c = cfg();
    let f = feed();
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path();
    let store = FsArtifactStore::under_output(out);

    ingest_and_persist(&f, &c, d(11), d(13), &store, IngestOptions::default())
        .await
        .expect("good run");
    let (_, bad_dir) = ingest_and_persist(&f, &c, d(12), d(12), &store, IngestOptions::default())
        .await
        .expect("second run");
    fs::write(bad_dir.join("mentions.csv"), "date,url\nnot-a-date,x\n").unwrap();

    let outcome = aggregate_output_dir(out, &c.output).expect("one readable run is enough");
    assert_eq!(outcome.runs, 1);
    assert_eq!(outcome.corrupt.len(), 1);
    assert_eq!(outcome.dataset.mentions.len(), 1);
}
