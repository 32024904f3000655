//! Internal domain models for ASIN resolution.
//!
//! These types are OUR types - they don't change when external APIs change.
//! Every source response gets converted into [`Candidate`]s via the adapters.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the three independent lookup strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    MarketplaceSearch,
    BibliographicApi,
    CatalogApi,
}

impl SourceKind {
    /// All sources in their default priority order.
    pub const ALL: [SourceKind; 3] = [
        SourceKind::MarketplaceSearch,
        SourceKind::BibliographicApi,
        SourceKind::CatalogApi,
    ];

    /// Stable name used in diagnostics and the cache `source` column
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::MarketplaceSearch => "marketplace-search",
            SourceKind::BibliographicApi => "bibliographic-api",
            SourceKind::CatalogApi => "catalog-api",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "marketplace-search" => Ok(SourceKind::MarketplaceSearch),
            "bibliographic-api" => Ok(SourceKind::BibliographicApi),
            "catalog-api" => Ok(SourceKind::CatalogApi),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// What the source matched on when it produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchBasis {
    /// Looked up by ISBN; the identifier is tied to the exact edition
    Isbn,
    /// Found through a title/author text search
    Text,
}

/// A possible answer produced by one source for one query variant
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub asin: String,
    pub source: SourceKind,
    /// Source-reported confidence (0.0 to 1.0)
    pub confidence: f32,
    pub raw_title: String,
    pub raw_author: String,
    pub basis: MatchBasis,
    pub fetched_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(asin: impl Into<String>, source: SourceKind, confidence: f32) -> Self {
        Self {
            asin: asin.into(),
            source,
            confidence: confidence.clamp(0.0, 1.0),
            raw_title: String::new(),
            raw_author: String::new(),
            basis: MatchBasis::Text,
            fetched_at: Utc::now(),
        }
    }

    /// Attach the title/author the source reported for this identifier
    pub fn with_metadata(mut self, title: impl Into<String>, author: impl Into<String>) -> Self {
        self.raw_title = title.into();
        self.raw_author = author.into();
        self
    }

    /// Mark this candidate as an ISBN-based match
    pub fn by_isbn(mut self) -> Self {
        self.basis = MatchBasis::Isbn;
        self
    }
}

/// Errors from a single source call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("request timed out")]
    Timeout,

    #[error("no results")]
    NotFound,

    #[error("rate limited by source")]
    RateLimited,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),
}

impl SourceError {
    /// Transient errors are worth retrying: timeouts, throttling, 5xx and
    /// connection-level failures. Everything else fails fast.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Timeout | SourceError::RateLimited | SourceError::Network(_) => true,
            SourceError::Http { status, .. } => *status >= 500,
            SourceError::NotFound | SourceError::MalformedResponse(_) => false,
        }
    }

    /// Map a non-success HTTP status to a source error
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status {
            reqwest::StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited,
            reqwest::StatusCode::NOT_FOUND => SourceError::NotFound,
            reqwest::StatusCode::REQUEST_TIMEOUT => SourceError::Timeout,
            _ => SourceError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").to_string(),
            },
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SourceError::Timeout
        } else if e.is_decode() {
            SourceError::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            SourceError::from_status(status)
        } else {
            SourceError::Network(e.to_string())
        }
    }
}

/// Per-source diagnostic carried by a failed (or partially failed) resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    /// Source name, or `resolver`/`cache` for failures outside the adapters
    pub source: String,
    pub message: String,
}

impl SourceFailure {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// How the winning ASIN was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Title/author (or ISBN) matched the query exactly
    Exact,
    /// Accepted by the fuzzy similarity threshold
    Fuzzy,
    /// Served from the cache without network activity
    Cached,
}

/// One step of a verbose resolution trace
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    CacheHit { fingerprint: String },
    CacheMiss { fingerprint: String },
    CacheError { message: String },
    Variant { index: usize, description: String },
    Attempt {
        source: SourceKind,
        variant: usize,
        attempt: u32,
        outcome: String,
    },
    RetryScheduled {
        source: SourceKind,
        attempt: u32,
        delay: Duration,
    },
    CandidateRejected {
        source: SourceKind,
        asin: String,
        reason: String,
    },
    EarlyExit {
        source: SourceKind,
        asin: String,
        confidence: f32,
    },
    Arbitration { summary: String },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::CacheHit { fingerprint } => write!(f, "cache hit for '{fingerprint}'"),
            TraceEvent::CacheMiss { fingerprint } => write!(f, "cache miss for '{fingerprint}'"),
            TraceEvent::CacheError { message } => write!(f, "cache unavailable: {message}"),
            TraceEvent::Variant { index, description } => {
                write!(f, "variant #{index}: {description}")
            }
            TraceEvent::Attempt {
                source,
                variant,
                attempt,
                outcome,
            } => write!(f, "  [{source}] variant #{variant} attempt {attempt}: {outcome}"),
            TraceEvent::RetryScheduled {
                source,
                attempt,
                delay,
            } => write!(
                f,
                "  [{source}] retrying after attempt {attempt} in {}ms",
                delay.as_millis()
            ),
            TraceEvent::CandidateRejected {
                source,
                asin,
                reason,
            } => write!(f, "  [{source}] rejected '{asin}': {reason}"),
            TraceEvent::EarlyExit {
                source,
                asin,
                confidence,
            } => write!(
                f,
                "  [{source}] {asin} at {:.0}% confidence, skipping remaining sources",
                confidence * 100.0
            ),
            TraceEvent::Arbitration { summary } => write!(f, "arbitration: {summary}"),
        }
    }
}

/// Outcome of a resolution request.
///
/// A missing `asin` is a normal, reportable result - `errors` explains why.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub asin: Option<String>,
    /// Winning source name, `cache` for cache hits, `none` on failure
    pub source: String,
    pub confidence: Option<f32>,
    pub match_kind: Option<MatchKind>,
    pub elapsed: Duration,
    /// Ordered per-source diagnostics
    pub errors: Vec<SourceFailure>,
    /// Only populated for verbose resolutions
    pub trace: Vec<TraceEvent>,
}

impl Resolution {
    /// A failed resolution carrying diagnostics
    pub fn failed(errors: Vec<SourceFailure>) -> Self {
        Self {
            asin: None,
            source: "none".to_string(),
            confidence: None,
            match_kind: None,
            elapsed: Duration::ZERO,
            errors,
            trace: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.asin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>(), Ok(kind));
        }
        assert!("nope".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_error_classification() {
        assert!(SourceError::Timeout.is_transient());
        assert!(SourceError::RateLimited.is_transient());
        assert!(
            SourceError::Http {
                status: 503,
                message: "Service Unavailable".into()
            }
            .is_transient()
        );
        assert!(!SourceError::NotFound.is_transient());
        assert!(!SourceError::MalformedResponse("bad json".into()).is_transient());
        assert!(
            !SourceError::Http {
                status: 403,
                message: "Forbidden".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            SourceError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            SourceError::RateLimited
        );
        assert_eq!(
            SourceError::from_status(reqwest::StatusCode::NOT_FOUND),
            SourceError::NotFound
        );
        assert!(matches!(
            SourceError::from_status(reqwest::StatusCode::BAD_GATEWAY),
            SourceError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn test_candidate_confidence_is_clamped() {
        let c = Candidate::new("B001QKBHG4", SourceKind::MarketplaceSearch, 1.7);
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.basis, MatchBasis::Text);
        assert_eq!(c.by_isbn().basis, MatchBasis::Isbn);
    }

    #[test]
    fn test_failed_resolution() {
        let r = Resolution::failed(vec![SourceFailure::new("catalog-api", "no results")]);
        assert!(!r.is_success());
        assert_eq!(r.source, "none");
        assert_eq!(r.errors.len(), 1);
    }
}
