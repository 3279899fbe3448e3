// src/ingest/providers/gdelt.rs
use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{header::RETRY_AFTER, StatusCode};

use crate::config::FeedConfig;
use crate::errors::FetchError;
use crate::ingest::types::{decode_body, Bucket, NGramFeed, RawPayload};

/// GDELT Web NGrams 3.0: one gzip'd JSON-lines file per minute.
pub struct GdeltProvider {
    mode: Mode,
}

enum Mode {
    Fixture(HashMap<Bucket, Vec<u8>>),
    Http {
        base_url: String,
        minute: u32,
        client: reqwest::Client,
    },
}

impl GdeltProvider {
    pub fn from_config(cfg: &FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("uncertainty-tracker/0.1")
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            mode: Mode::Http {
                base_url: cfg.base_url.trim_end_matches('/').to_string(),
                minute: cfg.minute_offset,
                client,
            },
        })
    }

    /// Serve canned bodies (plain or gzip) per bucket; unknown buckets are 404s.
    pub fn from_fixtures<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = (Bucket, B)>,
        B: Into<Vec<u8>>,
    {
        Self {
            mode: Mode::Fixture(items.into_iter().map(|(b, body)| (b, body.into())).collect()),
        }
    }

    /// URL of the feed file standing for `bucket`.
    pub fn url_for(base_url: &str, bucket: &Bucket, minute: u32) -> String {
        format!("{}/{}.webngrams.json.gz", base_url, bucket.file_stem(minute))
    }

    async fn fetch_http(
        client: &reqwest::Client,
        url: &str,
        bucket: &Bucket,
    ) -> Result<RawPayload, FetchError> {
        let t0 = std::time::Instant::now();
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("http get {url}: {e}")))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            counter!("ingest_rate_limited_total").increment(1);
            return Err(FetchError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(FetchError::Transient(format!("{url} -> {status}")));
        }
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!("{url} -> {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("{url} -> unexpected {status}")));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(format!("reading body of {url}: {e}")))?;
        let body = decode_body(&bytes)?;

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_fetch_ms").record(ms);
        tracing::debug!(%bucket, bytes = body.len(), ms, "fetched bucket");
        Ok(RawPayload::new(*bucket, body))
    }
}

#[async_trait]
impl NGramFeed for GdeltProvider {
    async fn fetch(&self, bucket: &Bucket) -> Result<RawPayload, FetchError> {
        match &self.mode {
            Mode::Fixture(items) => match items.get(bucket) {
                Some(body) => Ok(RawPayload::new(*bucket, decode_body(body)?)),
                None => Err(FetchError::Permanent(format!("no fixture for {bucket}"))),
            },
            Mode::Http {
                base_url,
                minute,
                client,
            } => {
                let url = Self::url_for(base_url, bucket, *minute);
                Self::fetch_http(client, &url, bucket).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "gdelt-webngrams"
    }
}
