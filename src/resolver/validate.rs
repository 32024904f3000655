//! ASIN structural validation.
//!
//! Book ASINs issued by the marketplace are a `B` followed by nine uppercase
//! alphanumerics. Print editions are often listed under their ISBN-10 instead;
//! those (and any ISBN-13) are rejected here so an ISBN is never reported as
//! the resolved identifier.

use super::domain::{Candidate, SourceKind};

/// Marketplace prefix every accepted identifier starts with
pub const ASIN_PREFIX: char = 'B';

/// Total identifier length including the prefix
pub const ASIN_LEN: usize = 10;

/// Strict check: exact prefix, length and character set, no normalization
pub fn is_valid_asin(value: &str) -> bool {
    let mut chars = value.chars();
    value.len() == ASIN_LEN
        && chars.next() == Some(ASIN_PREFIX)
        && chars.all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
}

/// Trim and uppercase a raw token, returning it only if it is a valid ASIN
pub fn normalize_asin(raw: &str) -> Option<String> {
    let candidate = raw.trim().to_ascii_uppercase();
    is_valid_asin(&candidate).then_some(candidate)
}

/// A candidate dropped by validation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub source: SourceKind,
    pub asin: String,
    pub reason: &'static str,
}

/// Split candidates into valid ones (ASIN normalized in place) and rejects
pub fn partition(candidates: Vec<Candidate>) -> (Vec<Candidate>, Vec<Rejected>) {
    let mut valid = Vec::with_capacity(candidates.len());
    let mut rejected = Vec::new();

    for mut candidate in candidates {
        match normalize_asin(&candidate.asin) {
            Some(asin) => {
                candidate.asin = asin;
                valid.push(candidate);
            }
            None => rejected.push(Rejected {
                source: candidate.source,
                reason: rejection_reason(&candidate.asin),
                asin: candidate.asin,
            }),
        }
    }

    (valid, rejected)
}

fn rejection_reason(raw: &str) -> &'static str {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == 'X') {
        "looks like an ISBN, not an ASIN"
    } else if trimmed.len() != ASIN_LEN {
        "wrong identifier length"
    } else {
        "wrong identifier prefix or characters"
    }
}
