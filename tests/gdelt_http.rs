// tests/gdelt_http.rs
//
// Live HTTP mode against a local axum server: status codes map onto the
// retry classes, and gzip bodies are decoded after a 200.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use flate2::{write::GzEncoder, Compression};

use uncertainty_tracker::config::FeedConfig;
use uncertainty_tracker::errors::FetchError;
use uncertainty_tracker::ingest::providers::gdelt::GdeltProvider;
use uncertainty_tracker::ingest::retry::{fetch_with_retry, RetryPolicy};
use uncertainty_tracker::ingest::types::{Bucket, NGramFeed};

const MINUTE: u32 = 1;

fn bucket(hour: u32) -> Bucket {
    Bucket::new(NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(), hour)
}

fn file_path(hour: u32) -> String {
    format!("/feed/{}.webngrams.json.gz", bucket(hour).file_stem(MINUTE))
}

fn gzip(body: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(body).unwrap();
    enc.finish().unwrap()
}

/// Counts requests per route.
#[derive(Clone, Default)]
struct Hits {
    rate_limited_once: Arc<AtomicUsize>,
    server_error: Arc<AtomicUsize>,
    missing: Arc<AtomicUsize>,
}

fn feed_router(hits: Hits) -> Router {
    let ok_body = gzip(b"{\"ngram\":\"uncertainty\"}\n{\"ngram\":\"x\"}\n");

    let Hits {
        rate_limited_once,
        server_error,
        missing,
    } = hits;

    Router::new()
        // hour 0: gzip'd JSON lines
        .route(
            &file_path(0),
            get(move || {
                let body = ok_body.clone();
                async move { (StatusCode::OK, body) }
            }),
        )
        // hour 1: always 429 with a server hint
        .route(
            &file_path(1),
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "7")]) }),
        )
        // hour 2: 429 once, then plain body
        .route(
            &file_path(2),
            get(move || {
                let n = rate_limited_once.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")]).into_response()
                    } else {
                        (StatusCode::OK, "{\"ngram\":\"later\"}\n").into_response()
                    }
                }
            }),
        )
        // hour 3: 503 forever
        .route(
            &file_path(3),
            get(move || {
                server_error.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::SERVICE_UNAVAILABLE }
            }),
        )
        // hour 4: 404, counted; anything else falls through to axum's 404
        .route(
            &file_path(4),
            get(move || {
                missing.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::NOT_FOUND }
            }),
        )
}

async fn spawn_feed(hits: Hits) -> GdeltProvider {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, feed_router(hits)).await.unwrap();
    });

    let cfg = FeedConfig {
        base_url: format!("http://{addr}/feed/"),
        minute_offset: MINUTE,
        timeout_secs: 5,
        ..FeedConfig::default()
    };
    GdeltProvider::from_config(&cfg).unwrap()
}

#[tokio::test]
async fn statuses_map_onto_fetch_errors() {
    let feed = spawn_feed(Hits::default()).await;

    let ok = feed.fetch(&bucket(0)).await.expect("gzip body decoded");
    assert_eq!(ok.bucket, bucket(0));
    assert_eq!(ok.lines().count(), 2);
    assert!(ok.body.starts_with(b"{\"ngram\":\"uncertainty\"}"));

    match feed.fetch(&bucket(1)).await {
        Err(FetchError::RateLimited { retry_after }) => {
            assert_eq!(retry_after, Some(Duration::from_secs(7)));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    assert!(matches!(
        feed.fetch(&bucket(3)).await,
        Err(FetchError::Transient(_))
    ));
    assert!(matches!(
        feed.fetch(&bucket(4)).await,
        Err(FetchError::Permanent(_))
    ));
    // no route at all is a 404 too
    assert!(matches!(
        feed.fetch(&bucket(9)).await,
        Err(FetchError::Permanent(_))
    ));
}

#[tokio::test]
async fn retry_classes_over_http() {
    let hits = Hits::default();
    let feed = spawn_feed(hits.clone()).await;
    let policy = RetryPolicy::immediate(3);

    // rate limit is waited out, then the body arrives
    let p = fetch_with_retry(&feed, &bucket(2), &policy)
        .await
        .expect("second request succeeds");
    assert_eq!(p.lines().count(), 1);
    assert_eq!(hits.rate_limited_once.load(Ordering::SeqCst), 2);

    // 5xx is retried up to the attempt budget
    let err = fetch_with_retry(&feed, &bucket(3), &policy).await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(hits.server_error.load(Ordering::SeqCst), 3);

    // 404 gives up after one request
    let err = fetch_with_retry(&feed, &bucket(4), &policy).await.unwrap_err();
    assert_eq!(err.attempts, 1);
    assert_eq!(hits.missing.load(Ordering::SeqCst), 1);
}
