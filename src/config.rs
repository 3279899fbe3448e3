// src/config.rs
//! Tracker configuration: keywords, normalization tables, feed and retry knobs.
//!
//! Loaded once at startup and passed by reference into the pipeline stages.
//! Every field has a default, so an empty file (or no file at all) is valid.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "TRACKER_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/tracker.toml";
pub const DEFAULT_JSON_PATH: &str = "config/tracker.json";

pub const DEFAULT_GDELT_BASE_URL: &str = "http://data.gdeltproject.org/gdeltv3/webngrams";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Tracked keywords, matched in canonical form.
    pub keywords: Vec<String>,
    /// Record languages to keep (`lang` field). Empty keeps everything.
    pub languages: Vec<String>,
    /// Source domains to keep. Empty keeps everything; subdomains match.
    pub domain_allowlist: Vec<String>,
    pub normalization: NormalizationConfig,
    pub extraction: ExtractionConfig,
    pub feed: FeedConfig,
    pub retry: RetryConfig,
    pub output: OutputConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["uncertainty".to_string()],
            languages: vec!["en".to_string()],
            domain_allowlist: Vec::new(),
            normalization: NormalizationConfig::default(),
            extraction: ExtractionConfig::default(),
            feed: FeedConfig::default(),
            retry: RetryConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Tokens shorter than this (in chars, after cleaning) are dropped.
    pub min_token_len: usize,
    pub stopwords: Vec<String>,
    /// canonical form -> variants that collapse onto it
    pub equivalences: BTreeMap<String, Vec<String>>,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            min_token_len: 4,
            stopwords: default_stopwords(),
            equivalences: default_equivalences(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Positions on each side of the keyword whose tokens count as co-occurring.
    pub cooccurrence_radius: usize,
    pub context_max_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            cooccurrence_radius: 10,
            context_max_chars: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    /// Hours of each day to fetch (0..=23).
    pub hours: Vec<u32>,
    /// Minute within the hour whose file represents the bucket.
    pub minute_offset: u32,
    pub timeout_secs: u64,
    /// Minimum spacing between two bucket requests.
    pub min_request_interval_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GDELT_BASE_URL.to_string(),
            hours: (0..24).collect(),
            minute_offset: 1,
            timeout_secs: 60,
            min_request_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_pause_secs: u64,
    pub max_rate_limit_waits: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            rate_limit_pause_secs: 60,
            max_rate_limit_waits: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub smoothing_window: usize,
    pub word_cloud_max_words: usize,
    /// Log a progress checkpoint every N buckets.
    pub progress_every: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("frontend/public/data/output"),
            smoothing_window: 7,
            word_cloud_max_words: 100,
            progress_every: 24,
        }
    }
}

impl TrackerConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading tracker config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing tracker config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Load using env var + fallbacks:
    /// 1) $TRACKER_CONFIG_PATH
    /// 2) config/tracker.toml
    /// 3) config/tracker.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from(DEFAULT_TOML_PATH);
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from(DEFAULT_JSON_PATH);
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default().sanitized())
    }

    /// Explicit path wins, otherwise the default lookup chain.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(p) => Self::load_from(p),
            None => Self::load_default(),
        }
    }

    /// Trim/lowercase/dedup the lists and pull numeric knobs back into range.
    pub fn sanitized(mut self) -> Self {
        self.keywords = clean_list(self.keywords);
        if self.keywords.is_empty() {
            self.keywords = TrackerConfig::default().keywords;
        }
        self.languages = clean_list(self.languages);
        self.domain_allowlist = clean_list(self.domain_allowlist);

        let n = &mut self.normalization;
        n.stopwords = clean_list(std::mem::take(&mut n.stopwords));
        n.equivalences = std::mem::take(&mut n.equivalences)
            .into_iter()
            .filter_map(|(canon, variants)| {
                let canon = canon.trim().to_lowercase();
                (!canon.is_empty()).then(|| (canon, clean_list(variants)))
            })
            .collect();
        n.min_token_len = n.min_token_len.max(1);

        let hours: BTreeSet<u32> = self.feed.hours.iter().copied().filter(|h| *h < 24).collect();
        self.feed.hours = if hours.is_empty() {
            (0..24).collect()
        } else {
            hours.into_iter().collect()
        };
        self.feed.minute_offset = self.feed.minute_offset.min(59);
        self.feed.base_url = self.feed.base_url.trim_end_matches('/').to_string();

        self.retry.max_attempts = self.retry.max_attempts.max(1);
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            std::mem::swap(&mut self.retry.max_delay_ms, &mut self.retry.base_delay_ms);
        }

        self.output.smoothing_window = self.output.smoothing_window.max(1);
        self.output.progress_every = self.output.progress_every.max(1);
        self
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<TrackerConfig> {
    // Try TOML first if hinted, JSON otherwise; fall back to the other one.
    if hint_ext == "toml" {
        return toml::from_str(s).map_err(|e| anyhow!("invalid TOML config: {e}"));
    }
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    if hint_ext != "json" {
        if let Ok(v) = toml::from_str(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported tracker config format"))
}

/// Trim, lowercase, drop empties and de-duplicate (sorted).
pub fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_lowercase());
        }
    }
    set.into_iter().collect()
}

fn default_stopwords() -> Vec<String> {
    const WORDS: &[&str] = &[
        // common English
        "this", "that", "with", "from", "have", "been", "will", "would", "could", "should",
        "their", "about", "there", "these", "those", "they", "what", "when", "where", "which",
        "while", "your", "said", "says", "also", "more", "some", "such", "than", "then", "them",
        "were", "into", "over", "under", "again", "further", "here", "once", "only", "very",
        "other", "same", "just", "most", "both", "much", "each", "before", "after", "above",
        "below", "during", "through", "between", "since", "until", "like", "does", "doing",
        "done", "many", "still", "even", "make", "made", "making", "take", "taking", "took",
        "taken", "come", "comes", "coming", "came", "going", "goes", "went", "gone", "being",
        "show", "shows", "showed", "shown", "showing", "give", "gives", "giving", "gave",
        "given", "find", "finds", "finding", "found", "want", "wants", "wanting", "wanted",
        // articles, prepositions, numerals, relative days
        "the", "and", "but", "for", "nor", "yet", "so", "either", "neither", "not", "all",
        "any", "few", "several", "one", "two", "three", "four", "five", "six", "seven",
        "eight", "nine", "ten", "first", "second", "third", "last", "next", "previous", "now",
        "today", "tomorrow", "yesterday",
        // reporting verbs
        "say", "saying", "told", "tells", "tell", "telling", "reported", "reports", "report",
        "reporting", "stated", "states", "state", "stating", "announced", "announces",
        "announce", "announcing", "noted", "notes", "note", "noting",
        // page furniture
        "image", "photo", "video", "getty", "reuters", "afp", "associated", "press",
        "copyright", "rights", "reserved", "caption", "source", "credit", "file", "picture",
        "pictures", "images", "photos", "videos", "article", "story", "news", "read", "click",
        "link", "visit", "website", "online", "follow", "twitter", "facebook", "instagram",
        "social", "media",
        // frequent but economically empty
        "already", "because", "too", "nevertheless", "continued", "despite", "around",
        "facing", "caused", "back", "surrounding", "added", "year", "time", "happen",
        "affected", "regarding", "huge", "prison", "raising", "big-picture", "mood", "danger",
        "president", "hitting", "issues",
    ];
    clean_list(WORDS.iter().map(|w| w.to_string()).collect())
}

fn default_equivalences() -> BTreeMap<String, Vec<String>> {
    const GROUPS: &[(&str, &[&str])] = &[
        ("economic", &["economy", "economic", "economics", "economical", "economies"]),
        ("tariffs", &["tariff", "tariffs", "tariffing"]),
        ("trump", &["trump", "trumps", "donald"]),
        ("market", &["market", "markets", "marketing", "marketplace"]),
        ("business", &["business", "businesses", "businessmen", "businesspeople"]),
        ("global", &["global", "globally", "globalization", "globalizing", "globe"]),
        ("policy", &["policy", "policies", "policymakers", "policymaking"]),
        ("financial", &["financial", "finance", "financially", "finances", "financing"]),
        ("trade", &["trade", "trades", "trading", "trader", "traders"]),
        ("inflation", &["inflation", "inflationary", "inflating"]),
        ("federal", &["federal", "fed", "federally", "federation"]),
        ("government", &["government", "governments", "governmental", "governance", "governing"]),
        ("political", &["political", "politically", "politics", "politician", "politicians"]),
        ("investment", &["investment", "investments", "investing", "investor", "investors"]),
        ("forecast", &["forecast", "forecasts", "forecasting", "forecaster", "forecasters"]),
        ("impact", &["impact", "impacts", "impacting", "impacted"]),
        ("research", &["research", "researching", "researched", "researcher", "researchers"]),
        ("change", &["change", "changes", "changing", "changed"]),
        ("consumer", &["consumer", "consumers", "consumption", "consuming"]),
        ("price", &["price", "prices", "pricing", "priced"]),
        ("growth", &["growth", "growing", "grow", "grows"]),
        ("risk", &["risk", "risks", "risky", "risking"]),
        ("bank", &["bank", "banks", "banking", "banker", "bankers"]),
        ("industry", &["industry", "industries", "industrial"]),
        ("stock", &["stock", "stocks", "stockmarket"]),
        ("interest", &["interest", "interests", "interesting"]),
        ("rate", &["rate", "rates", "rating"]),
        ("debt", &["debt", "debts", "debtor", "debtors"]),
        ("company", &["company", "companies", "corporation", "corporations"]),
    ];
    GROUPS
        .iter()
        .map(|(canon, variants)| {
            (
                canon.to_string(),
                variants.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}
