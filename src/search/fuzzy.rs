//! "Find similar title" matching.
//!
//! The base title is split into bracketed prefixes (circle, artist, event)
//! and a stem. A candidate is similar when it contains one of the meaningful
//! prefixes, or when it shares a long enough run of characters with the stem.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::search::lcs::longest_common_substring;
use crate::search::tokenizer::parse_prefix_stem;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W").unwrap());

/// Event/batch codes such as `C89`; they say nothing about the work itself.
static SCAN_BATCH_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z][0-9]{2}$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyConfig {
    /// Shortest common run that counts as similar.
    pub min_match_length: usize,
    /// The common run must be longer than this share of the shorter string.
    pub min_match_ratio: f64,
    /// Candidates shorter than this (in chars) are judged by full containment.
    pub short_candidate_length: usize,
    pub ignore_too_short_candidates: bool,
    pub enable_prefix_matching: bool,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            min_match_length: 4,
            min_match_ratio: 0.4,
            short_candidate_length: 4,
            ignore_too_short_candidates: true,
            enable_prefix_matching: true,
        }
    }
}

/// Normalized prefixes and stem of a base title.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityTarget {
    pub prefixes: Vec<String>,
    pub stem: String,
}

pub fn nfkc(s: &str) -> String {
    s.nfkc().collect()
}

fn strip_non_word(s: &str) -> String {
    NON_WORD.replace_all(s, "").into_owned()
}

pub struct FuzzyMatcher {
    config: FuzzyConfig,
}

impl FuzzyMatcher {
    pub fn new(config: FuzzyConfig) -> Self {
        Self { config }
    }

    /// Returns `None` when the title's brackets are unbalanced.
    pub fn target(&self, base: &str) -> Option<SimilarityTarget> {
        let base = nfkc(base);
        let parsed = match parse_prefix_stem(&base) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Cannot split title {:?} into prefixes and stem: {}", base, e);
                return None;
            }
        };
        debug!("prefixes: {:?}, stem: {:?}", parsed.prefixes, parsed.stem);

        let prefixes: Vec<String> = parsed
            .prefixes
            .iter()
            .map(|p| strip_non_word(p))
            // An empty prefix is contained in every candidate and would match them all.
            .filter(|p| !p.is_empty() && !SCAN_BATCH_CODE.is_match(p))
            .collect();
        let stem = strip_non_word(&parsed.stem);
        debug!("prefixes after filtering: {:?}, stem: {:?}", prefixes, stem);

        Some(SimilarityTarget { prefixes, stem })
    }

    pub fn is_similar(&self, target: &SimilarityTarget, candidate: &str) -> bool {
        let candidate = strip_non_word(&nfkc(candidate));

        if self.config.enable_prefix_matching
            && target.prefixes.iter().any(|p| candidate.contains(p.as_str()))
        {
            return true;
        }

        let candidate_len = candidate.chars().count();
        let stem_len = target.stem.chars().count();
        let lcs_len = longest_common_substring(&candidate, &target.stem).len;
        let min_len = candidate_len.min(stem_len);

        if candidate_len < self.config.short_candidate_length {
            !self.config.ignore_too_short_candidates && lcs_len >= min_len
        } else {
            lcs_len >= self.config.min_match_length
                && lcs_len as f64 > min_len as f64 * self.config.min_match_ratio
        }
    }

    /// Keeps the candidates whose `key` is similar to `base`, in input order.
    pub fn filter_similar<T, I, F>(&self, candidates: I, base: &str, key: F) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> &str,
    {
        let Some(target) = self.target(base) else {
            return Vec::new();
        };
        candidates
            .into_iter()
            .filter(|candidate| self.is_similar(&target, key(candidate)))
            .collect()
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(FuzzyConfig::default())
    }
}
