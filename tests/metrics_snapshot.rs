// tests/metrics_snapshot.rs
//
// Batch jobs record into the process-wide Prometheus recorder and leave a
// snapshot under <output>/metrics that the read API serves.
// The recorder is global, so this file holds a single test.

use axum::body::{self, Body};
use chrono::NaiveDate;
use http::{Request, StatusCode};
use tower::ServiceExt as _;

use uncertainty_tracker::aggregate::aggregate_output_dir;
use uncertainty_tracker::artifact::FsArtifactStore;
use uncertainty_tracker::config::TrackerConfig;
use uncertainty_tracker::ingest::providers::gdelt::GdeltProvider;
use uncertainty_tracker::ingest::types::Bucket;
use uncertainty_tracker::ingest::{ingest_and_persist, IngestOptions};
use uncertainty_tracker::metrics::{snapshot_path, snapshot_router, Metrics};

fn record(hour: u32) -> String {
    serde_json::json!({
        "date": format!("2025-01-12T{hour:02}:01:00Z"),
        "ngram": "uncertainty",
        "lang": "en",
        "type": 1,
        "pos": 10,
        "pre": "tariff policy",
        "post": "weighs on markets",
        "url": format!("https://news.example.com/story-{hour}"),
    })
    .to_string()
}

fn metric_value(text: &str, name: &str) -> Option<f64> {
    text.lines()
        .filter(|l| !l.starts_with('#'))
        .find_map(|l| {
            let (n, v) = l.split_once(' ')?;
            (n == name).then(|| v.trim().parse().ok()).flatten()
        })
}

#[tokio::test]
async fn batch_jobs_leave_a_served_snapshot() {
    let metrics = Metrics::install().expect("recorder installs once");

    let day = NaiveDate::from_ymd_opt(2025, 1, 12).unwrap();
    let mut cfg = TrackerConfig::default();
    cfg.feed.hours = vec![0, 1, 2];
    cfg.retry.base_delay_ms = 0;
    cfg.retry.max_delay_ms = 0;
    let cfg = cfg.sanitized();

    // hour 2 has no file: a permanent miss
    let feed = GdeltProvider::from_fixtures(vec![
        (Bucket::new(day, 0), record(0)),
        (Bucket::new(day, 1), record(1)),
    ]);

    let tmp = tempfile::tempdir().unwrap();
    let store = FsArtifactStore::under_output(tmp.path());
    ingest_and_persist(&feed, &cfg, day, day, &store, IngestOptions::default())
        .await
        .expect("run with one missing bucket succeeds");
    aggregate_output_dir(tmp.path(), &cfg.output).expect("aggregate");

    let path = metrics.write_snapshot(tmp.path(), "ingest").unwrap();
    assert_eq!(path, snapshot_path(tmp.path(), "ingest"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(metric_value(&text, "ingest_buckets_total"), Some(2.0));
    assert_eq!(metric_value(&text, "ingest_buckets_unavailable_total"), Some(1.0));
    assert_eq!(metric_value(&text, "ingest_matches_total"), Some(2.0));
    assert_eq!(metric_value(&text, "aggregate_runs_total"), Some(1.0));
    assert!(text.contains("# HELP ingest_buckets_total"));

    let app = snapshot_router(tmp.path());
    let req = Request::builder()
        .uri("/metrics/ingest")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let served = body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    assert_eq!(served.as_ref(), text.as_bytes());
}
