// src/ingest/walker.rs
//! Lazy walk over every `(date, hour)` bucket of a date range.
//!
//! Nothing is fetched until [`BucketWalker::next_bucket`] is awaited, and each
//! call fetches at most one bucket, so memory stays bounded by one payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use tokio::time::Instant;

use crate::errors::BucketUnavailable;
use crate::ingest::retry::{fetch_with_retry, RetryPolicy};
use crate::ingest::types::{Bucket, NGramFeed, RawPayload};

#[derive(Debug)]
pub enum BucketOutcome {
    Fetched(RawPayload),
    Unavailable(BucketUnavailable),
}

pub struct BucketWalker<'a> {
    feed: &'a dyn NGramFeed,
    start: NaiveDate,
    hours: Vec<u32>,
    total: u64,
    next: u64,
    policy: RetryPolicy,
    min_interval: Duration,
    last_request: Option<Instant>,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> BucketWalker<'a> {
    /// Walk `start..=end` (inclusive) over `hours` of each day. An inverted
    /// range or an empty hour list yields nothing.
    pub fn new(
        feed: &'a dyn NGramFeed,
        start: NaiveDate,
        end: NaiveDate,
        hours: &[u32],
        policy: RetryPolicy,
    ) -> Self {
        let days = if end < start {
            0
        } else {
            (end - start).num_days() as u64 + 1
        };
        Self {
            feed,
            start,
            hours: hours.to_vec(),
            total: days * hours.len() as u64,
            next: 0,
            policy,
            min_interval: Duration::ZERO,
            last_request: None,
            stop: None,
        }
    }

    /// Resume from bucket `offset` (0-based, in walk order).
    pub fn starting_at(mut self, offset: u64) -> Self {
        self.next = offset.min(self.total);
        self
    }

    /// Minimum spacing between the starts of two consecutive fetches.
    pub fn min_request_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// End the walk early once `flag` is raised; checked before every bucket.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = Some(flag);
        self
    }

    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Offset of the next bucket to be fetched.
    pub fn position(&self) -> u64 {
        self.next
    }

    pub fn stopped(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Bucket at walk offset `i`, if inside the range.
    pub fn bucket_at(&self, i: u64) -> Option<Bucket> {
        if i >= self.total {
            return None;
        }
        let per_day = self.hours.len() as u64;
        let date = self.start.checked_add_days(Days::new(i / per_day))?;
        Some(Bucket::new(date, self.hours[(i % per_day) as usize]))
    }

    /// Fetch the next bucket. `None` at the end of the range or once stopped.
    pub async fn next_bucket(&mut self) -> Option<BucketOutcome> {
        if self.stopped() {
            return None;
        }
        let bucket = self.bucket_at(self.next)?;
        self.next += 1;

        if let Some(last) = self.last_request {
            let ready_at = last + self.min_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        self.last_request = Some(Instant::now());

        Some(match fetch_with_retry(self.feed, &bucket, &self.policy).await {
            Ok(payload) => BucketOutcome::Fetched(payload),
            Err(unavailable) => BucketOutcome::Unavailable(unavailable),
        })
    }
}
