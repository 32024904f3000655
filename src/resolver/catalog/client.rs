//! Open Library HTTP client
//!
//! ISBN lookups hit the edition endpoint and are treated as exact. Without an
//! ISBN (or when the edition lists no marketplace identifier) we fall back to
//! the work search endpoint.

use std::time::Duration;

use serde::de::DeserializeOwned;

use super::{adapter, dto};
use crate::query::Variant;
use crate::resolver::domain::{Candidate, SourceError};
use crate::resolver::limiter::SourceLimiter;

const USER_AGENT: &str = concat!("asin-finder/", env!("CARGO_PKG_VERSION"));

const SEARCH_FIELDS: &str = "key,title,author_name,id_amazon";

/// Open Library client
pub struct CatalogClient {
    http_client: reqwest::Client,
    base_url: String,
    limiter: SourceLimiter,
}

impl CatalogClient {
    pub fn new(
        base_url: impl Into<String>,
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
            limiter,
        })
    }

    /// Create a client for testing with custom base URL
    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        use crate::resolver::domain::SourceKind;

        Self::new(
            base_url,
            Duration::from_secs(5),
            SourceLimiter::unlimited(SourceKind::CatalogApi),
        )
        .expect("Failed to build HTTP client")
    }

    /// Search for one query variant
    pub async fn search(&self, variant: &Variant) -> Result<Vec<Candidate>, SourceError> {
        if let Some(isbn) = &variant.isbn {
            match self.lookup_isbn(isbn).await {
                Ok(candidates) if !candidates.is_empty() => return Ok(candidates),
                Ok(_) | Err(SourceError::NotFound) => {
                    tracing::debug!("Catalog: no identifier on edition {}", isbn);
                }
                Err(e) => return Err(e),
            }
        }

        if variant.title.trim().is_empty() {
            return Err(SourceError::NotFound);
        }

        let candidates = self
            .search_works(&variant.title, variant.author.as_deref())
            .await?;
        if candidates.is_empty() {
            return Err(SourceError::NotFound);
        }
        Ok(candidates)
    }

    /// Marketplace identifiers listed on the edition with this ISBN
    pub async fn lookup_isbn(&self, isbn: &str) -> Result<Vec<Candidate>, SourceError> {
        let url = format!("{}/isbn/{}.json", self.base_url, urlencoding::encode(isbn));
        let edition: dto::Edition = self.get_json(&url).await?;
        Ok(adapter::edition_candidates(&edition))
    }

    async fn search_works(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Vec<Candidate>, SourceError> {
        let mut url = format!(
            "{}/search.json?title={}&fields={}&limit={}",
            self.base_url,
            urlencoding::encode(title),
            SEARCH_FIELDS,
            adapter::MAX_SEARCH_DOCS
        );
        if let Some(author) = author {
            url.push_str("&author=");
            url.push_str(&urlencoding::encode(author));
        }

        let response: dto::SearchResponse = self.get_json(&url).await?;
        Ok(adapter::search_candidates(&response))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        self.limiter.acquire().await;

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SourceError::MalformedResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Normalizer, Query};

    #[test]
    fn test_client_with_custom_url() {
        let client = CatalogClient::with_base_url("http://localhost:8080");
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_user_agent_format() {
        assert!(USER_AGENT.starts_with("asin-finder/"));
    }

    #[tokio::test]
    async fn test_isbn_only_query_against_unreachable_host() {
        let client = CatalogClient::with_base_url("http://127.0.0.1:9");
        let query = Query::by_isbn("9780765326355");
        let variants = Normalizer::default().variants(&query);
        let variant = variants.iter().next().unwrap();

        let err = client.search(&variant).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
