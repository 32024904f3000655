//! Books API HTTP client
//!
//! Tries several query-string strategies per variant, most specific first,
//! and stops at the first strategy that yields candidates. Volumes without a
//! listed marketplace identifier are mapped through their ISBN-13 using the
//! marketplace client, when one is attached.

use std::sync::Arc;
use std::time::Duration;

use smallvec::{SmallVec, smallvec};

use super::{adapter, dto};
use crate::query::Variant;
use crate::resolver::domain::{Candidate, MatchBasis, SourceError};
use crate::resolver::limiter::SourceLimiter;
use crate::resolver::marketplace::MarketplaceClient;

const USER_AGENT: &str = concat!("asin-finder/", env!("CARGO_PKG_VERSION"));

/// Volumes requested per query
const MAX_RESULTS: u32 = 10;

/// Secondary ISBN lookups per strategy; each one costs a marketplace request
const MAX_ISBN_LOOKUPS: usize = 2;

/// Confidence kept when the identifier came from a secondary lookup
const SECONDARY_PENALTY: f32 = 0.95;

/// One way of phrasing the `q` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Isbn(String),
    /// `intitle:` / `inauthor:` qualifiers
    TitleAuthor { title: String, author: String },
    /// Title and author as free text
    Plain(String),
    TitleOnly(String),
}

impl Strategy {
    /// Strategies for a variant, most specific first
    pub fn for_variant(variant: &Variant) -> SmallVec<[Strategy; 3]> {
        if let Some(isbn) = &variant.isbn {
            return smallvec![Strategy::Isbn(isbn.clone())];
        }
        match &variant.author {
            Some(author) => smallvec![
                Strategy::TitleAuthor {
                    title: variant.title.clone(),
                    author: author.clone(),
                },
                Strategy::Plain(format!("{} {}", variant.title, author)),
                Strategy::TitleOnly(variant.title.clone()),
            ],
            None => smallvec![Strategy::Plain(variant.title.clone())],
        }
    }

    pub fn query_string(&self) -> String {
        match self {
            Strategy::Isbn(isbn) => format!("isbn:{isbn}"),
            Strategy::TitleAuthor { title, author } => {
                format!("intitle:{title} inauthor:{author}")
            }
            Strategy::Plain(text) | Strategy::TitleOnly(text) => text.clone(),
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Strategy::Isbn(_) => 1.0,
            Strategy::TitleAuthor { .. } => 0.9,
            Strategy::Plain(_) => 0.8,
            Strategy::TitleOnly(_) => 0.7,
        }
    }

    fn basis(&self) -> MatchBasis {
        match self {
            Strategy::Isbn(_) => MatchBasis::Isbn,
            _ => MatchBasis::Text,
        }
    }
}

/// Books API client
pub struct BibliographicClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: SourceLimiter,
    marketplace: Option<Arc<MarketplaceClient>>,
}

impl BibliographicClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        limiter: SourceLimiter,
    ) -> reqwest::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            limiter,
            marketplace: None,
        })
    }

    /// Create a client for testing with custom base URL
    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        use crate::resolver::domain::SourceKind;

        Self::new(
            base_url,
            None,
            Duration::from_secs(5),
            SourceLimiter::unlimited(SourceKind::BibliographicApi),
        )
        .expect("Failed to build HTTP client")
    }

    /// Resolve ISBN-only volumes through the marketplace
    pub fn with_marketplace(mut self, marketplace: Arc<MarketplaceClient>) -> Self {
        self.marketplace = Some(marketplace);
        self
    }

    /// Search for one query variant
    pub async fn search(&self, variant: &Variant) -> Result<Vec<Candidate>, SourceError> {
        for strategy in Strategy::for_variant(variant) {
            let response = self.send_volumes_request(&strategy).await?;
            let candidates = self.to_candidates(&strategy, response).await;
            if !candidates.is_empty() {
                return Ok(candidates);
            }
            tracing::debug!("Books API: nothing usable for {:?}", strategy);
        }
        Err(SourceError::NotFound)
    }

    async fn to_candidates(
        &self,
        strategy: &Strategy,
        response: dto::VolumesResponse,
    ) -> Vec<Candidate> {
        let confidence = strategy.confidence();
        let basis = strategy.basis();
        let matches = adapter::to_matches(response);

        let mut candidates: Vec<Candidate> = matches
            .iter()
            .filter_map(|m| {
                m.asin
                    .as_deref()
                    .map(|asin| m.to_candidate(asin, confidence, basis))
            })
            .collect();

        let Some(marketplace) = &self.marketplace else {
            return candidates;
        };

        let pending = matches
            .iter()
            .filter(|m| m.asin.is_none())
            .filter_map(|m| m.isbn13.as_deref().map(|isbn| (m, isbn)))
            .take(MAX_ISBN_LOOKUPS);

        for (volume, isbn) in pending {
            match marketplace.lookup_isbn(isbn).await {
                Ok(found) => {
                    if let Some(top) = found.first() {
                        candidates.push(volume.to_candidate(
                            &top.asin,
                            confidence * SECONDARY_PENALTY,
                            basis,
                        ));
                    }
                }
                Err(e) => tracing::debug!("Books API: ISBN {} not mapped: {}", isbn, e),
            }
        }

        candidates
    }

    async fn send_volumes_request(
        &self,
        strategy: &Strategy,
    ) -> Result<dto::VolumesResponse, SourceError> {
        let mut url = format!(
            "{}/volumes?q={}&maxResults={}&printType=books",
            self.base_url,
            urlencoding::encode(&strategy.query_string()),
            MAX_RESULTS
        );
        if let Some(key) = &self.api_key {
            url.push_str("&key=");
            url.push_str(&urlencoding::encode(key));
        }

        self.limiter.acquire().await;

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimited);
        }

        if !status.is_success() {
            // Try to parse error response
            if let Ok(error) = response.json::<dto::ApiError>().await {
                return Err(SourceError::Http {
                    status: status.as_u16(),
                    message: error.error.message,
                });
            }
            return Err(SourceError::from_status(status));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::MalformedResponse(e.to_string()))
    }
}
