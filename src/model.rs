// src/model.rs
//! Records shared by the ingestion, aggregation and time-series stages.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Joins `co_occurring_terms` inside one CSV cell. Normalization never emits
/// a term containing it.
pub const TERM_SEPARATOR: char = '|';

/// One observed occurrence of a tracked keyword in one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub date: NaiveDate,
    pub source_domain: String,
    pub url: String,
    /// Canonical form of the keyword that matched.
    pub matched_keyword: String,
    /// Raw tokens around the match, in order.
    pub context_window: Vec<String>,
    /// Canonical co-occurring tokens; keywords and stopwords excluded.
    pub co_occurring_terms: BTreeSet<String>,
}

/// Natural key: duplicates under it are the same mention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MentionKey {
    pub date: NaiveDate,
    pub url: String,
    pub keyword: String,
}

impl Mention {
    pub fn key(&self) -> MentionKey {
        MentionKey {
            date: self.date,
            url: self.url.clone(),
            keyword: self.matched_keyword.clone(),
        }
    }

    pub fn context_snippet(&self) -> String {
        self.context_window.join(" ")
    }

    /// Short content hash (everything but the key) for conflict reports.
    pub fn content_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.source_domain.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.context_snippet().as_bytes());
        hasher.update([0u8]);
        for t in &self.co_occurring_terms {
            hasher.update(t.as_bytes());
            hasher.update([b'|']);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrenceRecord {
    pub term: String,
    /// Number of distinct mentions containing `term`.
    pub frequency: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: String,
    pub mention_count: u64,
}

/// Operator-facing counters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub buckets_total: u64,
    pub buckets_processed: u64,
    pub buckets_unavailable: u64,
    pub records_seen: u64,
    pub malformed_records: u64,
    pub filtered_records: u64,
    pub matches_found: u64,
    pub duplicate_matches: u64,
    pub mentions: u64,
    pub stopped_early: bool,
}

/// Provenance of one run. `created_at` never drives ordering logic beyond
/// the aggregator's deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub keywords: Vec<String>,
    pub stats: RunStats,
}

/// Immutable output of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifact {
    pub manifest: RunManifest,
    pub mentions: Vec<Mention>,
    pub cooccurrences: Vec<CoOccurrenceRecord>,
    pub domains: Vec<DomainRecord>,
}

impl RunArtifact {
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }
}

/// Fold of every run artifact currently present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalDataset {
    pub mentions: Vec<Mention>,
    pub cooccurrences: Vec<CoOccurrenceRecord>,
    pub domains: Vec<DomainRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub date: NaiveDate,
    pub raw_count: u64,
    pub smoothed_count: f64,
}

/// Co-occurrence table: one count per distinct mention containing the term.
/// Sorted by descending frequency, then term.
pub fn count_terms<'a, I>(mentions: I) -> Vec<CoOccurrenceRecord>
where
    I: IntoIterator<Item = &'a Mention>,
{
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for m in mentions {
        for t in &m.co_occurring_terms {
            *counts.entry(t.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<CoOccurrenceRecord> = counts
        .into_iter()
        .map(|(term, frequency)| CoOccurrenceRecord {
            term: term.to_string(),
            frequency,
        })
        .collect();
    sort_cooccurrences(&mut out);
    out
}

/// Mentions per source domain, sorted like [`count_terms`].
pub fn count_domains<'a, I>(mentions: I) -> Vec<DomainRecord>
where
    I: IntoIterator<Item = &'a Mention>,
{
    let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
    for m in mentions {
        *counts.entry(m.source_domain.as_str()).or_default() += 1;
    }
    let mut out: Vec<DomainRecord> = counts
        .into_iter()
        .map(|(domain, mention_count)| DomainRecord {
            domain: domain.to_string(),
            mention_count,
        })
        .collect();
    sort_domains(&mut out);
    out
}

pub fn sort_cooccurrences(rows: &mut [CoOccurrenceRecord]) {
    rows.sort_by(|a, b| b.frequency.cmp(&a.frequency).then_with(|| a.term.cmp(&b.term)));
}

pub fn sort_domains(rows: &mut [DomainRecord]) {
    rows.sort_by(|a, b| {
        b.mention_count
            .cmp(&a.mention_count)
            .then_with(|| a.domain.cmp(&b.domain))
    });
}
