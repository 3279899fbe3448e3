//! Read-only HTTP view over the canonical output files.
//!
//! Every request reads the files fresh, so a new `aggregate` pass shows up
//! without a restart. The remote feed is never contacted from here.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::artifact::{
    load_canonical_cooccurrences, load_canonical_domains, load_canonical_mentions,
    CANONICAL_COOCCURRENCES, CANONICAL_DOMAINS, CANONICAL_MENTIONS,
};
use crate::errors::ArtifactError;
use crate::ingest::is_allowed_domain;
use crate::model::{CoOccurrenceRecord, DomainRecord, Mention, TimeSeriesPoint};
use crate::timeseries;

const DEFAULT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    output_dir: Arc<PathBuf>,
    default_window: usize,
}

impl AppState {
    pub fn new(output_dir: impl Into<PathBuf>, default_window: usize) -> Self {
        Self {
            output_dir: Arc::new(output_dir.into()),
            default_window: default_window.max(1),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/mentions", get(mentions))
        .route("/timeseries", get(series))
        .route("/cooccurrences", get(cooccurrences))
        .route("/domains", get(domains))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn require(state: &AppState, file: &str) -> Result<(), (StatusCode, String)> {
    if state.output_dir.join(file).exists() {
        Ok(())
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("{file} not found; run `aggregate` first"),
        ))
    }
}

fn internal(e: ArtifactError) -> (StatusCode, String) {
    tracing::warn!(target: "api", error = %e, "reading canonical data failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct MentionQuery {
    keyword: Option<String>,
    domain: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: Option<usize>,
}

async fn mentions(
    State(state): State<AppState>,
    Query(q): Query<MentionQuery>,
) -> ApiResult<Vec<Mention>> {
    require(&state, CANONICAL_MENTIONS)?;
    let all = load_canonical_mentions(&state.output_dir).map_err(internal)?;

    let keyword = q.keyword.as_deref().map(|k| k.trim().to_lowercase());
    let domain = q.domain.as_deref().map(|d| vec![d.trim().to_lowercase()]);
    let out = all
        .into_iter()
        .filter(|m| keyword.as_deref().map_or(true, |k| m.matched_keyword == k))
        .filter(|m| {
            domain
                .as_deref()
                .map_or(true, |d| is_allowed_domain(&m.source_domain, d))
        })
        .filter(|m| q.from.map_or(true, |f| m.date >= f))
        .filter(|m| q.to.map_or(true, |t| m.date <= t))
        .take(q.limit.unwrap_or(DEFAULT_LIMIT))
        .collect();
    Ok(Json(out))
}

#[derive(Debug, Default, Deserialize)]
struct WindowQuery {
    window: Option<usize>,
}

async fn series(
    State(state): State<AppState>,
    Query(q): Query<WindowQuery>,
) -> ApiResult<Vec<TimeSeriesPoint>> {
    require(&state, CANONICAL_MENTIONS)?;
    let all = load_canonical_mentions(&state.output_dir).map_err(internal)?;
    let window = q.window.unwrap_or(state.default_window);
    Ok(Json(timeseries::build(&all, window)))
}

#[derive(Debug, Default, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

async fn cooccurrences(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<CoOccurrenceRecord>> {
    require(&state, CANONICAL_COOCCURRENCES)?;
    let mut rows = load_canonical_cooccurrences(&state.output_dir).map_err(internal)?;
    rows.truncate(q.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(rows))
}

async fn domains(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Vec<DomainRecord>> {
    require(&state, CANONICAL_DOMAINS)?;
    let mut rows = load_canonical_domains(&state.output_dir).map_err(internal)?;
    rows.truncate(q.limit.unwrap_or(DEFAULT_LIMIT));
    Ok(Json(rows))
}
