// src/normalize.rs
//! Token canonicalization for co-occurrence counting.
//!
//! The engine is built once from [`NormalizationConfig`] and shared by
//! reference. Grouping of near-duplicate forms is a plain lookup table taken
//! from configuration with no stemming, so reported
//! frequencies only move when the table moves.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::config::NormalizationConfig;
use crate::model::TERM_SEPARATOR;

#[derive(Debug, Clone)]
pub struct NormalizationEngine {
    stopwords: HashSet<String>,
    /// variant -> canonical form (canonical forms map to themselves)
    variants: HashMap<String, String>,
    min_token_len: usize,
}

impl NormalizationEngine {
    pub fn new(cfg: &NormalizationConfig) -> Self {
        let stopwords = cfg.stopwords.iter().map(|w| w.to_lowercase()).collect();

        // BTreeMap iteration keeps this stable: a variant listed under two
        // groups belongs to the alphabetically first canonical form.
        let mut variants = HashMap::new();
        for (canon, group) in &cfg.equivalences {
            let canon = canon.to_lowercase();
            variants
                .entry(canon.clone())
                .or_insert_with(|| canon.clone());
            for v in group {
                variants
                    .entry(v.to_lowercase())
                    .or_insert_with(|| canon.clone());
            }
        }

        Self {
            stopwords,
            variants,
            min_token_len: cfg.min_token_len,
        }
    }

    /// Canonical form of `token`, or `None` when it is a stopword, punctuation
    /// only, shorter than the configured minimum, or not a single term.
    pub fn normalize(&self, token: &str) -> Option<String> {
        let cleaned = clean_token(token);
        if !cleaned.chars().any(char::is_alphanumeric) || !is_single_term(&cleaned) {
            return None;
        }
        if cleaned.chars().count() < self.min_token_len || self.stopwords.contains(&cleaned) {
            return None;
        }
        let canonical = self.variants.get(&cleaned).cloned().unwrap_or(cleaned);
        if self.stopwords.contains(&canonical) || !is_single_term(&canonical) {
            return None;
        }
        Some(canonical)
    }

    /// Canonical form of a tracked keyword. Multi-word keywords are
    /// canonicalized word by word; stopword and length filters do not apply.
    pub fn canonical_keyword(&self, keyword: &str) -> String {
        keyword
            .split_whitespace()
            .map(|w| self.canonical_word(w))
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Clean + equivalence lookup without any filtering.
    pub fn canonical_word(&self, token: &str) -> String {
        let cleaned = clean_token(token);
        self.variants.get(&cleaned).cloned().unwrap_or(cleaned)
    }
}

/// Whitespace or the persisted term separator would split the term on reload.
fn is_single_term(term: &str) -> bool {
    !term.contains(TERM_SEPARATOR) && !term.chars().any(char::is_whitespace)
}

fn is_edge_punct(c: char) -> bool {
    matches!(
        c,
        '.' | ',' | ';' | ':' | '"' | '\'' | '!' | '?' | '(' | ')' | '[' | ']' | '{' | '}'
            | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}' | '\u{2026}' | '-' | '\u{2013}'
            | '\u{2014}'
    )
}

/// Lowercase and strip the punctuation GDELT leaves glued to words.
///
/// `report.that` -> `report`, `"tariffs,"` -> `tariffs`, `company's` -> `company`.
pub fn clean_token(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let mut word = decoded.trim().to_lowercase();

    // Sentence boundaries swallowed by the tokenizer: keep the first part
    // when it is a real word.
    if let Some((head, _)) = word.split_once('.') {
        if head.chars().count() > 2 {
            word = head.to_string();
        }
    }

    for q in ['"', '\''] {
        if word.len() >= 2 && word.starts_with(q) && word.ends_with(q) {
            word = word[1..word.len() - 1].to_string();
        }
    }

    let trimmed = word.trim_matches(is_edge_punct);

    static RE_POSSESSIVE: OnceCell<Regex> = OnceCell::new();
    let re = RE_POSSESSIVE.get_or_init(|| Regex::new(r"['\u{2019}]s$").expect("possessive regex"));
    re.replace(trimmed, "").into_owned()
}
