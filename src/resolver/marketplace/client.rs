//! Marketplace search HTTP client
//!
//! Scrapes the public search page of a single configured marketplace.
//! Requests rotate through a small pool of browser identities and walk the
//! departments in order until one returns a listing with a usable ASIN.
//!
//! IMPORTANT: the search page throttles aggressively. Every request draws
//! from the shared [`SourceLimiter`] before it is sent.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header;

use super::adapter;
use crate::query::Variant;
use crate::resolver::domain::{Candidate, MatchBasis, SourceError};
use crate::resolver::limiter::SourceLimiter;
use crate::resolver::validate::normalize_asin;

/// Browser identities rotated across requests
const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:130.0) Gecko/20100101 Firefox/130.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0",
];

/// Search category, tried in [`Department::SEARCH_ORDER`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Department {
    Kindle,
    Books,
    All,
}

impl Department {
    pub const SEARCH_ORDER: [Department; 3] = [Department::Kindle, Department::Books, Department::All];

    /// Value of the `i` query parameter; `None` searches everything
    pub fn param(&self) -> Option<&'static str> {
        match self {
            Department::Kindle => Some("digital-text"),
            Department::Books => Some("stripbooks"),
            Department::All => None,
        }
    }
}

/// Marketplace search client
pub struct MarketplaceClient {
    http_client: reqwest::Client,
    base_url: String,
    limiter: SourceLimiter,
    identity: AtomicUsize,
}

impl MarketplaceClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        limiter: SourceLimiter,
    ) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            limiter,
            identity: AtomicUsize::new(0),
        })
    }

    /// Create a client for testing with custom base URL
    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        use crate::resolver::domain::SourceKind;

        Self::new(
            base_url,
            Duration::from_secs(5),
            SourceLimiter::unlimited(SourceKind::MarketplaceSearch),
        )
        .expect("Failed to build HTTP client")
    }

    /// Search for one query variant. Variants carrying an ISBN search by ISBN.
    pub async fn search(&self, variant: &Variant) -> Result<Vec<Candidate>, SourceError> {
        match &variant.isbn {
            Some(isbn) => self.lookup_isbn(isbn).await,
            None => {
                let keywords = match &variant.author {
                    Some(author) => format!("{} {}", variant.title, author),
                    None => variant.title.clone(),
                };
                self.search_keywords(&keywords, MatchBasis::Text).await
            }
        }
    }

    /// Find the listing for an exact ISBN
    pub async fn lookup_isbn(&self, isbn: &str) -> Result<Vec<Candidate>, SourceError> {
        self.search_keywords(isbn, MatchBasis::Isbn).await
    }

    async fn search_keywords(
        &self,
        keywords: &str,
        basis: MatchBasis,
    ) -> Result<Vec<Candidate>, SourceError> {
        walk_departments(keywords, |department| {
            self.search_department(keywords, department, basis)
        })
        .await
    }

    async fn search_department(
        &self,
        keywords: &str,
        department: Department,
        basis: MatchBasis,
    ) -> Result<Vec<Candidate>, SourceError> {
        let mut url = format!("{}/s?k={}", self.base_url, urlencoding::encode(keywords));
        if let Some(param) = department.param() {
            url.push_str("&i=");
            url.push_str(param);
        }

        self.limiter.acquire().await;

        let response = self
            .http_client
            .get(&url)
            .header(header::USER_AGENT, self.next_identity())
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // A 404 search page just means this department had nothing
            return Ok(Vec::new());
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            // Served together with a bot check
            return Err(SourceError::RateLimited);
        }
        if !status.is_success() {
            return Err(SourceError::from_status(status));
        }

        let body = response.text().await?;
        adapter::parse_results(&body, basis)
    }

    fn next_identity(&self) -> &'static str {
        let index = self.identity.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[index % USER_AGENTS.len()]
    }
}

/// Try each department until one lists a valid ASIN. Listings that only
/// carry print ISBNs are kept as a last resort so the validator can report them.
async fn walk_departments<F, Fut>(keywords: &str, mut fetch: F) -> Result<Vec<Candidate>, SourceError>
where
    F: FnMut(Department) -> Fut,
    Fut: Future<Output = Result<Vec<Candidate>, SourceError>>,
{
    let mut unusable = Vec::new();
    for department in Department::SEARCH_ORDER {
        let candidates = fetch(department).await?;
        if candidates.iter().any(|c| normalize_asin(&c.asin).is_some()) {
            tracing::debug!(
                "Marketplace: {} listing(s) for '{}' in {:?}",
                candidates.len(),
                keywords,
                department
            );
            return Ok(candidates);
        }
        if !candidates.is_empty() {
            tracing::debug!("Marketplace: no ASIN listings in {:?}, trying next", department);
            if unusable.is_empty() {
                unusable = candidates;
            }
        }
    }

    if unusable.is_empty() {
        Err(SourceError::NotFound)
    } else {
        Ok(unusable)
    }
}
