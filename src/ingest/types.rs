// src/ingest/types.rs
use std::fmt;
use std::io::Read;

use chrono::NaiveDate;
use flate2::read::GzDecoder;

use crate::errors::FetchError;

/// Smallest unit of remote retrieval: one UTC date + one hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bucket {
    pub date: NaiveDate,
    pub hour: u32,
}

impl Bucket {
    pub fn new(date: NaiveDate, hour: u32) -> Self {
        Self { date, hour }
    }

    /// `YYYYMMDDHHMM00`, the feed's file naming scheme.
    pub fn file_stem(&self, minute: u32) -> String {
        format!(
            "{}{:02}{:02}00",
            self.date.format("%Y%m%d"),
            self.hour,
            minute
        )
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{:02}h", self.date, self.hour)
    }
}

/// Decoded body of one bucket: newline-delimited JSON window records.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub bucket: Bucket,
    pub body: Vec<u8>,
}

impl RawPayload {
    pub fn new(bucket: Bucket, body: Vec<u8>) -> Self {
        Self { bucket, body }
    }

    /// Non-blank lines, still as raw bytes; encoding is checked per record.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.body
            .split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
    }
}

/// Remote n-gram feed: one call per bucket.
#[async_trait::async_trait]
pub trait NGramFeed: Send + Sync {
    async fn fetch(&self, bucket: &Bucket) -> Result<RawPayload, FetchError>;
    fn name(&self) -> &'static str;
}

/// Gunzip when the body carries the gzip magic, pass through otherwise.
/// Empty or undecodable bodies are transient failures (worth a retry).
pub fn decode_body(bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::Transient("empty body".to_string()));
    }
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut out = Vec::with_capacity(bytes.len() * 4);
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| FetchError::Transient(format!("gzip decode: {e}")))?;
        if out.iter().all(u8::is_ascii_whitespace) {
            return Err(FetchError::Transient("empty body after gunzip".to_string()));
        }
        return Ok(out);
    }
    Ok(bytes.to_vec())
}
