//! The closed set of lookup sources the resolver can query.

use std::sync::Arc;

use super::bibliographic::BibliographicClient;
use super::catalog::CatalogClient;
use super::domain::{Candidate, SourceError, SourceKind};
use super::marketplace::MarketplaceClient;
use crate::query::Variant;

/// A configured source, ready to search
pub enum Source {
    /// Shared with the bibliographic client for ISBN mapping
    Marketplace(Arc<MarketplaceClient>),
    Bibliographic(BibliographicClient),
    Catalog(CatalogClient),
    #[cfg(test)]
    Mock(mocks::MockSource),
}

impl Source {
    pub fn kind(&self) -> SourceKind {
        match self {
            Source::Marketplace(_) => SourceKind::MarketplaceSearch,
            Source::Bibliographic(_) => SourceKind::BibliographicApi,
            Source::Catalog(_) => SourceKind::CatalogApi,
            #[cfg(test)]
            Source::Mock(mock) => mock.kind,
        }
    }

    /// Look up one query variant. Zero results is `Err(NotFound)`.
    pub async fn search(&self, variant: &Variant) -> Result<Vec<Candidate>, SourceError> {
        match self {
            Source::Marketplace(client) => client.search(variant).await,
            Source::Bibliographic(client) => client.search(variant).await,
            Source::Catalog(client) => client.search(variant).await,
            #[cfg(test)]
            Source::Mock(mock) => mock.search(variant).await,
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================
