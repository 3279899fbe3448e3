// src/extract.rs
//! Keyword matching inside n-gram window records.
//!
//! A record looks like
//! `{"date":"2025-01-12T00:01:00Z","ngram":"uncertainty","lang":"en","type":1,"pos":12,
//!   "pre":"... words before","post":"words after ...","url":"https://..."}`.
//! The centre `ngram` is the token under test; `pre`/`post` are the feed's own
//! context, which may be wider than the co-occurrence radius used here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeSet;

use crate::config::TrackerConfig;
use crate::errors::MalformedRecord;
use crate::ingest::types::RawPayload;
use crate::ingest::{domain_of, is_allowed_domain};
use crate::model::Mention;
use crate::normalize::NormalizationEngine;

#[derive(Debug, Deserialize)]
struct WindowRecord {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    ngram: Option<String>,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    pre: Option<String>,
    #[serde(default)]
    post: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone)]
struct Keyword {
    canonical: String,
    words: Vec<String>,
}

/// Result of scanning one payload.
#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub matches: Vec<Mention>,
    pub records: u64,
    pub malformed: u64,
    /// Dropped by the language filter or the domain allow-list.
    pub filtered: u64,
}

/// What a single record turned into.
#[derive(Debug, PartialEq)]
pub enum RecordOutcome {
    Match(Mention),
    NoMatch,
    Filtered,
}

pub struct WindowExtractor<'a> {
    engine: &'a NormalizationEngine,
    keywords: Vec<Keyword>,
    /// Every word of every keyword, canonical; never counted as co-occurring.
    keyword_words: BTreeSet<String>,
    radius: usize,
    context_max_chars: usize,
    languages: Vec<String>,
    allowlist: Vec<String>,
}

impl<'a> WindowExtractor<'a> {
    pub fn new(engine: &'a NormalizationEngine, cfg: &TrackerConfig) -> Self {
        let mut keywords: Vec<Keyword> = cfg
            .keywords
            .iter()
            .map(|k| engine.canonical_keyword(k))
            .filter(|k| !k.is_empty())
            .map(|canonical| Keyword {
                words: canonical.split(' ').map(str::to_string).collect(),
                canonical,
            })
            .collect();
        // Longer phrases first so "economic uncertainty" wins over "economic".
        keywords.sort_by(|a, b| {
            b.words
                .len()
                .cmp(&a.words.len())
                .then_with(|| a.canonical.cmp(&b.canonical))
        });
        keywords.dedup_by(|a, b| a.canonical == b.canonical);
        let keyword_words = keywords
            .iter()
            .flat_map(|k| k.words.iter().cloned())
            .collect();

        Self {
            engine,
            keywords,
            keyword_words,
            radius: cfg.extraction.cooccurrence_radius,
            context_max_chars: cfg.extraction.context_max_chars,
            languages: cfg.languages.clone(),
            allowlist: cfg.domain_allowlist.clone(),
        }
    }

    pub fn keywords(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.canonical.clone()).collect()
    }

    /// Scan every record of one bucket. Bad records are counted, never fatal.
    pub fn extract(&self, payload: &RawPayload) -> ExtractOutcome {
        let mut out = ExtractOutcome::default();
        for line in payload.lines() {
            out.records += 1;
            match self.extract_record(line, payload.bucket.date) {
                Ok(RecordOutcome::Match(m)) => out.matches.push(m),
                Ok(RecordOutcome::NoMatch) => {}
                Ok(RecordOutcome::Filtered) => out.filtered += 1,
                Err(e) => {
                    out.malformed += 1;
                    tracing::trace!(target: "extract", error = %e, bucket = %payload.bucket, "skipping record");
                }
            }
        }
        out
    }

    /// Classify one raw record. `fallback_date` is used when the record
    /// carries no parsable date of its own.
    pub fn extract_record(
        &self,
        line: &[u8],
        fallback_date: NaiveDate,
    ) -> Result<RecordOutcome, MalformedRecord> {
        let text = std::str::from_utf8(line).map_err(|_| MalformedRecord::Encoding)?;
        let rec: WindowRecord =
            serde_json::from_str(text.trim()).map_err(|e| MalformedRecord::Json(e.to_string()))?;

        let url = rec
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(MalformedRecord::MissingField("url"))?;
        let ngram = rec
            .ngram
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or(MalformedRecord::MissingField("ngram"))?;

        if !self.languages.is_empty() {
            let lang = rec.lang.as_deref().unwrap_or_default().trim();
            if !self.languages.iter().any(|l| l.eq_ignore_ascii_case(lang)) {
                return Ok(RecordOutcome::Filtered);
            }
        }

        let center: Vec<&str> = ngram.split_whitespace().collect();
        let before: Vec<&str> = rec.pre.as_deref().unwrap_or_default().split_whitespace().collect();
        let after: Vec<&str> = rec.post.as_deref().unwrap_or_default().split_whitespace().collect();

        let Some((keyword, consumed_after)) = self.match_keyword(&center, &after) else {
            return Ok(RecordOutcome::NoMatch);
        };

        let domain = domain_of(url).unwrap_or_default();
        if !is_allowed_domain(&domain, &self.allowlist) {
            return Ok(RecordOutcome::Filtered);
        }

        let lo = before.len().saturating_sub(self.radius);
        let near_before = &before[lo..];
        let near_after = after.iter().skip(consumed_after).take(self.radius);
        let co_occurring_terms = near_before
            .iter()
            .chain(near_after)
            .filter_map(|t| self.engine.normalize(t))
            .filter(|t| !self.keyword_words.contains(t))
            .collect();

        let date = rec
            .date
            .as_deref()
            .and_then(parse_record_date)
            .unwrap_or(fallback_date);

        Ok(RecordOutcome::Match(Mention {
            date,
            source_domain: domain,
            url: url.to_string(),
            matched_keyword: keyword.canonical.clone(),
            context_window: self.context_tokens(&before, &center, &after),
            co_occurring_terms,
        }))
    }

    /// A keyword matches when its words start at the centre token. Returns
    /// the keyword and how many `post` tokens the phrase used up.
    fn match_keyword(&self, center: &[&str], after: &[&str]) -> Option<(&Keyword, usize)> {
        self.keywords.iter().find_map(|kw| {
            let n = kw.words.len();
            let seq: Vec<String> = center
                .iter()
                .chain(after.iter())
                .take(n)
                .map(|t| self.engine.canonical_word(t))
                .collect();
            (seq == kw.words).then(|| (kw, n.saturating_sub(center.len())))
        })
    }

    /// Whole feed window, cut to `context_max_chars` on a token boundary.
    fn context_tokens(&self, before: &[&str], center: &[&str], after: &[&str]) -> Vec<String> {
        let mut out = Vec::new();
        let mut used = 0usize;
        for t in before.iter().chain(center).chain(after) {
            let add = t.chars().count() + usize::from(!out.is_empty());
            if used + add > self.context_max_chars {
                break;
            }
            used += add;
            out.push(t.to_string());
        }
        out
    }
}

/// Calendar day (UTC) of a record timestamp in any of the feed's shapes.
pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y%m%d%H%M%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Bucket;

    fn cfg() -> TrackerConfig {
        let mut c = TrackerConfig::default();
        c.extraction.cooccurrence_radius = 3;
        c.keywords = vec!["uncertainty".into(), "economic uncertainty".into()];
        c.sanitized()
    }

    fn fallback() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 12).unwrap()
    }

    fn record(ngram: &str, pre: &str, post: &str) -> String {
        serde_json::json!({
            "date": "2025-01-12T03:01:00Z",
            "ngram": ngram,
            "lang": "en",
            "type": 1,
            "pos": 40,
            "pre": pre,
            "post": post,
            "url": "https://www.example.com/markets/story-1",
        })
        .to_string()
    }

    #[test]
    fn single_keyword_match_with_radius() {
        let c = cfg();
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);

        let line = record(
            "uncertainty",
            "far away words then Tariff driven market",
            "weighs on investors, analysts warned loudly",
        );
        let RecordOutcome::Match(m) = ex.extract_record(line.as_bytes(), fallback()).unwrap() else {
            panic!("expected a match");
        };
        assert_eq!(m.matched_keyword, "uncertainty");
        assert_eq!(m.date, fallback());
        assert_eq!(m.source_domain, "www.example.com");
        // radius 3: "tariff driven market" | "weighs on investors,"
        let terms: Vec<&str> = m.co_occurring_terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["driven", "investment", "market", "tariffs", "weighs"]);
        assert!(m.context_window.contains(&"far".to_string()));
    }

    #[test]
    fn repeated_term_is_one_entry_and_keyword_is_excluded() {
        let c = cfg();
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);
        let line = record("uncertainty", "tariff uncertainty", "tariffs");
        let RecordOutcome::Match(m) = ex.extract_record(line.as_bytes(), fallback()).unwrap() else {
            panic!("expected a match");
        };
        let terms: Vec<&str> = m.co_occurring_terms.iter().map(String::as_str).collect();
        assert_eq!(terms, vec!["tariffs"]);
    }

    #[test]
    fn multiword_keyword_starts_at_centre() {
        let c = cfg();
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);
        let line = record("Economic", "rising", "uncertainty hurts hiring");
        let RecordOutcome::Match(m) = ex.extract_record(line.as_bytes(), fallback()).unwrap() else {
            panic!("expected a match");
        };
        assert_eq!(m.matched_keyword, "economic uncertainty");
        assert!(m.co_occurring_terms.contains("hurts"));
        assert!(!m.co_occurring_terms.contains("economic"));
    }

    #[test]
    fn non_matching_filtered_and_malformed_records() {
        let c = cfg();
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);

        let other = record("inflation", "a", "b");
        assert_eq!(ex.extract_record(other.as_bytes(), fallback()).unwrap(), RecordOutcome::NoMatch);

        let german = r#"{"ngram":"uncertainty","lang":"de","url":"https://x.de/a"}"#;
        assert_eq!(ex.extract_record(german.as_bytes(), fallback()).unwrap(), RecordOutcome::Filtered);

        assert_eq!(
            ex.extract_record(br#"{"ngram":"uncertainty","lang":"en"}"#, fallback()).unwrap_err(),
            MalformedRecord::MissingField("url")
        );
        assert!(matches!(
            ex.extract_record(b"{not json", fallback()).unwrap_err(),
            MalformedRecord::Json(_)
        ));
        assert_eq!(
            ex.extract_record(&[0xff, 0xfe, b'{'], fallback()).unwrap_err(),
            MalformedRecord::Encoding
        );
    }

    #[test]
    fn payload_scan_counts_everything() {
        let c = cfg();
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);
        let body = format!(
            "{}\n{}\nnot-json\n{}\n",
            record("uncertainty", "trade", "outlook"),
            record("growth", "", ""),
            r#"{"ngram":"uncertainty","lang":"fr","url":"https://x.fr/"}"#
        );
        let payload = RawPayload::new(Bucket::new(fallback(), 3), body.into_bytes());
        let out = ex.extract(&payload);
        assert_eq!(out.records, 4);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.malformed, 1);
        assert_eq!(out.filtered, 1);
    }

    #[test]
    fn allowlist_filters_matches_by_domain() {
        let mut c = cfg();
        c.domain_allowlist = vec!["reuters.com".into()];
        let engine = NormalizationEngine::new(&c.normalization);
        let ex = WindowExtractor::new(&engine, &c);
        let line = record("uncertainty", "a", "b");
        assert_eq!(ex.extract_record(line.as_bytes(), fallback()).unwrap(), RecordOutcome::Filtered);
    }

    #[test]
    fn record_dates_in_feed_shapes() {
        let d = Some(fallback());
        assert_eq!(parse_record_date("2025-01-12T23:59:00Z"), d);
        assert_eq!(parse_record_date("2025-01-12T00:01:00"), d);
        assert_eq!(parse_record_date("20250112000100"), d);
        assert_eq!(parse_record_date("2025-01-12"), d);
        assert_eq!(parse_record_date("garbage"), None);
    }
}
