//! Approximate name matching.
//!
//! Names on the source carry initials, prefixes and suffixes glued on in
//! inconsistent ways ("D.KOWSALYA", "KOWSALYA D"). The matcher accepts those
//! while refusing short, low-information fragments:
//!
//! 1. exact match after normalisation scores 100;
//! 2. the longest query token (the "main part") must be at least 3 chars
//!    and must overlap some candidate token;
//! 3. a full-substring hit scores by length ratio against one floor, a
//!    token-absorption hit (main part of 4+ chars) against another.

use crate::models::job::MatchMode;
use crate::models::record::{MatchField, Record};

const MIN_MAIN_PART: usize = 3;
const MIN_ABSORBED_MAIN_PART: usize = 4;

/// Acceptance floors, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub substring_floor: u8,
    pub token_floor: u8,
}

impl Thresholds {
    pub const STRICT: Thresholds = Thresholds {
        substring_floor: 60,
        token_floor: 50,
    };

    pub const BROAD: Thresholds = Thresholds {
        substring_floor: 30,
        token_floor: 30,
    };

    pub fn for_mode(mode: MatchMode) -> Self {
        match mode {
            MatchMode::Strict => Self::STRICT,
            MatchMode::Broad => Self::BROAD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchScore {
    pub is_match: bool,
    pub score: u8,
    pub matched_text: String,
}

impl MatchScore {
    fn hit(score: usize, matched_text: impl Into<String>) -> Self {
        Self {
            is_match: true,
            score: score.min(100) as u8,
            matched_text: matched_text.into(),
        }
    }

    fn miss() -> Self {
        Self {
            is_match: false,
            score: 0,
            matched_text: String::new(),
        }
    }
}

/// Best field of a record against a set of queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMatch {
    pub field: MatchField,
    pub query: String,
    pub score: MatchScore,
}

#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    thresholds: Thresholds,
}

impl Matcher {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn score(&self, query: &str, candidate: &str) -> MatchScore {
        let query_norm = normalize(query);
        let candidate_norm = normalize(candidate);

        if query_norm == candidate_norm {
            return MatchScore::hit(100, candidate_norm);
        }

        let query_tokens = tokens(query);
        let Some(main) = longest(&query_tokens) else {
            return MatchScore::miss();
        };
        let main_len = main.chars().count();
        if main_len < MIN_MAIN_PART {
            return MatchScore::miss();
        }

        let candidate_tokens = tokens(candidate);
        let overlaps = |t: &String| t.contains(main) || main.contains(t.as_str());
        if !candidate_tokens.iter().any(overlaps) {
            return MatchScore::miss();
        }

        let candidate_len = candidate_norm.chars().count();

        if candidate_norm.contains(&query_norm) {
            let score = 100 * query_norm.chars().count() / candidate_len.max(1);
            return if score >= usize::from(self.thresholds.substring_floor) {
                MatchScore::hit(score, query_norm)
            } else {
                MatchScore::miss()
            };
        }

        if main_len >= MIN_ABSORBED_MAIN_PART {
            let absorbing = candidate_tokens
                .iter()
                .find(|t| overlaps(*t) && t.chars().count() >= main_len);
            if let Some(token) = absorbing {
                let score = 100 * main_len / candidate_len.max(main_len);
                if score >= usize::from(self.thresholds.token_floor) {
                    return MatchScore::hit(score, token.clone());
                }
            }
        }

        MatchScore::miss()
    }

    /// Highest-scoring (query, field) pair of `record`. Ties keep the earlier
    /// query, then the earlier field.
    pub fn best_match(&self, queries: &[String], record: &Record) -> Option<BestMatch> {
        let mut best: Option<BestMatch> = None;
        for query in queries {
            for (field, value) in record.name_fields() {
                let score = self.score(query, value);
                if !score.is_match {
                    continue;
                }
                if best.as_ref().is_none_or(|b| score.score > b.score.score) {
                    best = Some(BestMatch {
                        field,
                        query: query.clone(),
                        score,
                    });
                }
            }
        }
        best
    }
}

/// Lowercase, drop periods, collapse whitespace runs.
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase tokens split on whitespace and periods.
fn tokens(s: &str) -> Vec<String> {
    s.to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '.')
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// First of the longest tokens.
fn longest(tokens: &[String]) -> Option<&str> {
    tokens
        .iter()
        .fold(None::<&String>, |best, t| match best {
            Some(b) if b.chars().count() >= t.chars().count() => Some(b),
            _ => Some(t),
        })
        .map(String::as_str)
}
