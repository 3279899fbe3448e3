// src/errors.rs
//! Error taxonomy for ingestion, artifact persistence and aggregation.
//!
//! Failures local to one bucket or one record are absorbed and counted by the
//! pipeline; only the variants documented as terminal ever reach the caller.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::ingest::types::Bucket;

/// Outcome of a single fetch attempt against the remote feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error, empty/undecodable body or HTTP 5xx. Worth retrying.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// HTTP 429 or equivalent. `retry_after` carries the server hint when present.
    #[error("rate limited by feed (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    /// 404 or other 4xx: retrying cannot help.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// One bucket failed for good after retries. Recorded and skipped, never fatal.
#[derive(Debug, Clone, Error)]
#[error("bucket {bucket} unavailable after {attempts} attempt(s): {reason}")]
pub struct BucketUnavailable {
    pub bucket: Bucket,
    pub attempts: u32,
    pub reason: String,
}

/// One n-gram window record could not be used. Skipped and counted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedRecord {
    #[error("record is not valid UTF-8")]
    Encoding,
    #[error("record is not valid JSON: {0}")]
    Json(String),
    #[error("record is missing field `{0}`")]
    MissingField(&'static str),
}

/// Terminal failures of one ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("no bucket of the range was reachable ({unavailable} unavailable)")]
    SourceUnreachable { unavailable: u64 },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Reading or writing run artifacts and canonical files.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The artifact exists but cannot be parsed. Excluded from the fold.
    #[error("corrupt artifact at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("artifact i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        ArtifactError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Terminal failures of one aggregation pass.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no run artifacts found")]
    NoArtifacts,
    #[error("none of the {found} run artifacts could be read")]
    NoReadableArtifacts { found: usize },
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
