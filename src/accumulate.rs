// src/accumulate.rs
//! One-pass accumulation of a run's matches into a [`RunArtifact`].

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

use crate::errors::BucketUnavailable;
use crate::extract::ExtractOutcome;
use crate::model::{
    sort_cooccurrences, sort_domains, CoOccurrenceRecord, DomainRecord, Mention, MentionKey,
    RunArtifact, RunManifest, RunStats,
};

/// `run_<start>_to_<end>_<created_at>`, unique per run and sortable by range.
pub fn run_id(start: NaiveDate, end: NaiveDate, created_at: DateTime<Utc>) -> String {
    format!(
        "run_{}_to_{}_{}",
        start.format("%Y%m%d"),
        end.format("%Y%m%d"),
        created_at.format("%Y%m%dT%H%M%S%6fZ")
    )
}

#[derive(Debug)]
pub struct RunAccumulator {
    start: NaiveDate,
    end: NaiveDate,
    keywords: Vec<String>,
    seen: HashSet<MentionKey>,
    mentions: Vec<Mention>,
    term_counts: BTreeMap<String, u64>,
    domain_counts: BTreeMap<String, u64>,
    stats: RunStats,
}

impl RunAccumulator {
    pub fn new(start: NaiveDate, end: NaiveDate, keywords: Vec<String>, buckets_total: u64) -> Self {
        Self {
            start,
            end,
            keywords,
            seen: HashSet::new(),
            mentions: Vec::new(),
            term_counts: BTreeMap::new(),
            domain_counts: BTreeMap::new(),
            stats: RunStats {
                buckets_total,
                ..RunStats::default()
            },
        }
    }

    /// Fold in the extraction result of one fetched bucket.
    pub fn record_bucket(&mut self, outcome: ExtractOutcome) {
        self.stats.buckets_processed += 1;
        self.stats.records_seen += outcome.records;
        self.stats.malformed_records += outcome.malformed;
        self.stats.filtered_records += outcome.filtered;
        self.accumulate(outcome.matches);
    }

    pub fn record_unavailable(&mut self, unavailable: &BucketUnavailable) {
        self.stats.buckets_unavailable += 1;
        tracing::warn!(
            target: "ingest",
            bucket = %unavailable.bucket,
            attempts = unavailable.attempts,
            reason = %unavailable.reason,
            "bucket unavailable, skipping"
        );
    }

    /// De-duplicate by natural key (first wins) and count distinct mentions.
    pub fn accumulate<I>(&mut self, matches: I)
    where
        I: IntoIterator<Item = Mention>,
    {
        for m in matches {
            self.stats.matches_found += 1;
            if !self.seen.insert(m.key()) {
                self.stats.duplicate_matches += 1;
                continue;
            }
            for t in &m.co_occurring_terms {
                *self.term_counts.entry(t.clone()).or_default() += 1;
            }
            *self.domain_counts.entry(m.source_domain.clone()).or_default() += 1;
            self.mentions.push(m);
        }
        self.stats.mentions = self.mentions.len() as u64;
    }

    pub fn progress(&self) -> RunStats {
        self.stats.clone()
    }

    /// Close the run. An accumulator with no mentions still yields a valid artifact.
    pub fn finish(self, created_at: DateTime<Utc>, stopped_early: bool) -> RunArtifact {
        let mut stats = self.stats;
        stats.stopped_early = stopped_early;

        let mut cooccurrences: Vec<CoOccurrenceRecord> = self
            .term_counts
            .into_iter()
            .map(|(term, frequency)| CoOccurrenceRecord { term, frequency })
            .collect();
        sort_cooccurrences(&mut cooccurrences);

        let mut domains: Vec<DomainRecord> = self
            .domain_counts
            .into_iter()
            .map(|(domain, mention_count)| DomainRecord {
                domain,
                mention_count,
            })
            .collect();
        sort_domains(&mut domains);

        RunArtifact {
            manifest: RunManifest {
                run_id: run_id(self.start, self.end, created_at),
                created_at,
                start_date: self.start,
                end_date: self.end,
                keywords: self.keywords,
                stats,
            },
            mentions: self.mentions,
            cooccurrences,
            domains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Bucket;
    use crate::model::{count_domains, count_terms};
    use chrono::TimeZone;

    fn d() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()
    }

    fn mention(url: &str, terms: &[&str]) -> Mention {
        Mention {
            date: d(),
            source_domain: "example.com".into(),
            url: url.into(),
            matched_keyword: "uncertainty".into(),
            context_window: vec!["uncertainty".into()],
            co_occurring_terms: terms.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn duplicates_within_a_run_collapse_first_wins() {
        let mut acc = RunAccumulator::new(d(), d(), vec!["uncertainty".into()], 2);
        acc.record_bucket(ExtractOutcome {
            matches: vec![mention("https://example.com/a", &["tariffs"])],
            records: 3,
            malformed: 1,
            filtered: 1,
        });
        acc.record_bucket(ExtractOutcome {
            matches: vec![
                mention("https://example.com/a", &["tariffs", "market"]),
                mention("https://example.com/b", &["market"]),
            ],
            records: 2,
            ..ExtractOutcome::default()
        });

        let stats = acc.progress();
        assert_eq!(stats.buckets_processed, 2);
        assert_eq!(stats.records_seen, 5);
        assert_eq!(stats.matches_found, 3);
        assert_eq!(stats.duplicate_matches, 1);
        assert_eq!(stats.mentions, 2);

        let created = Utc.with_ymd_and_hms(2025, 2, 1, 8, 30, 0).unwrap();
        let art = acc.finish(created, false);
        assert_eq!(art.mentions[0].co_occurring_terms.len(), 1);
        // incremental tables agree with a recount from the kept mentions
        assert_eq!(art.cooccurrences, count_terms(&art.mentions));
        assert_eq!(art.domains, count_domains(&art.mentions));
        assert_eq!(
            art.manifest.run_id,
            "run_20250112_to_20250112_20250201T083000000000Z"
        );
    }

    #[test]
    fn empty_run_is_a_valid_artifact() {
        let mut acc = RunAccumulator::new(d(), d(), vec![], 1);
        acc.record_unavailable(&BucketUnavailable {
            bucket: Bucket::new(d(), 0),
            attempts: 3,
            reason: "503".into(),
        });
        let art = acc.finish(Utc::now(), true);
        assert!(art.is_empty());
        assert!(art.cooccurrences.is_empty());
        assert_eq!(art.manifest.stats.buckets_unavailable, 1);
        assert!(art.manifest.stats.stopped_early);
    }
}
