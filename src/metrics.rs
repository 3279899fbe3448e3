//! Prometheus recorder for every subcommand.
//!
//! `serve` renders its own registry on `/metrics`. `ingest` and `aggregate`
//! are short-lived, so they write their final registry to
//! `<output>/metrics/<job>.prom`, which `serve` exposes on `/metrics/{job}`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::{
    extract::{Path as UrlPath, State},
    http::StatusCode,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const SNAPSHOT_DIR: &str = "metrics";

/// Batch jobs that leave a snapshot behind.
pub const SNAPSHOT_JOBS: [&str; 2] = ["ingest", "aggregate"];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process, before
    /// any metric is described or recorded.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing prometheus recorder")?;
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    /// Write the current registry to `<output_dir>/metrics/<job>.prom`
    /// (temp file + rename) and return the path.
    pub fn write_snapshot(&self, output_dir: &Path, job: &str) -> Result<PathBuf> {
        let path = snapshot_path(output_dir, job);
        let dir = output_dir.join(SNAPSHOT_DIR);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let tmp = dir.join(format!(".{job}.prom.tmp"));
        fs::write(&tmp, self.handle.render())
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("publishing {}", path.display()))?;
        Ok(path)
    }
}

pub fn snapshot_path(output_dir: &Path, job: &str) -> PathBuf {
    output_dir.join(SNAPSHOT_DIR).join(format!("{job}.prom"))
}

/// `/metrics/{job}`: the last snapshot a batch job left under `output_dir`.
pub fn snapshot_router(output_dir: impl Into<PathBuf>) -> Router {
    Router::new()
        .route("/metrics/{job}", get(snapshot))
        .with_state(output_dir.into())
}

async fn snapshot(
    State(dir): State<PathBuf>,
    UrlPath(job): UrlPath<String>,
) -> Result<String, StatusCode> {
    if !SNAPSHOT_JOBS.contains(&job.as_str()) {
        return Err(StatusCode::NOT_FOUND);
    }
    tokio::fs::read_to_string(snapshot_path(&dir, &job))
        .await
        .map_err(|_| StatusCode::NOT_FOUND)
}
