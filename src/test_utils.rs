//! Test utilities and fixtures for asin-finder tests.
//!
//! Common helpers for temporary caches and candidate factories.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_cache, listing};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (cache, _dir) = temp_cache().await;
//!     let c = listing("B001QKBHG4", SourceKind::MarketplaceSearch, 0.95, "Mistborn", "Brandon Sanderson");
//!     // ... test logic
//! }
//! ```

use std::time::Duration;

use tempfile::TempDir;

use crate::cache::{AsinCache, DEFAULT_DB_NAME};
use crate::resolver::{Candidate, SourceKind};

/// TTL used by test caches
pub const TEST_TTL: Duration = Duration::from_secs(3600);

/// Creates a temporary cache for testing.
///
/// The database lives in a temporary directory that is removed when the
/// returned `TempDir` is dropped. Keep it alive for the duration of the test.
pub async fn temp_cache() -> (AsinCache, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let cache = AsinCache::open(dir.path().join(DEFAULT_DB_NAME), TEST_TTL)
        .await
        .expect("Failed to open test cache");
    (cache, dir)
}

/// A text-search candidate with title/author metadata
pub fn listing(
    asin: &str,
    source: SourceKind,
    confidence: f32,
    title: &str,
    author: &str,
) -> Candidate {
    Candidate::new(asin, source, confidence).with_metadata(title, author)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_cache_is_empty() {
        let (cache, dir) = temp_cache().await;
        assert!(cache.path().starts_with(dir.path()));
        assert_eq!(cache.stats().await.unwrap().total, 0);
    }

    #[test]
    fn test_listing() {
        let c = listing("B001QKBHG4", SourceKind::CatalogApi, 0.9, "Mistborn", "Brandon Sanderson");
        assert_eq!(c.raw_author, "Brandon Sanderson");
    }
}
