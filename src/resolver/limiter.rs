//! Process-wide request budgets, one per source.
//!
//! Every client holds a clone of its source's [`SourceLimiter`]; clones share
//! the same GCRA state, so all concurrent resolutions draw from one budget.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::domain::SourceKind;
use crate::config::SourcesConfig;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Slowest budget we allow: one request per minute
const MIN_REQUESTS_PER_SECOND: f64 = 1.0 / 60.0;

const UNLIMITED_PER_SECOND: NonZeroU32 = match NonZeroU32::new(100_000) {
    Some(n) => n,
    None => NonZeroU32::MIN,
};

/// Shared request budget for one source
#[derive(Clone)]
pub struct SourceLimiter {
    kind: SourceKind,
    inner: Arc<DirectLimiter>,
}

impl SourceLimiter {
    /// Allow `requests_per_second` on average with a burst of one
    pub fn per_second(kind: SourceKind, requests_per_second: f64) -> Self {
        let rps = if requests_per_second.is_finite() {
            requests_per_second.max(MIN_REQUESTS_PER_SECOND)
        } else {
            MIN_REQUESTS_PER_SECOND
        };
        let period = Duration::from_secs_f64(1.0 / rps);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::MIN);

        Self {
            kind,
            inner: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Budget that never throttles in practice (tests, local mirrors)
    pub fn unlimited(kind: SourceKind) -> Self {
        let quota = Quota::per_second(UNLIMITED_PER_SECOND);
        Self {
            kind,
            inner: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Wait until the budget allows one more request
    pub async fn acquire(&self) {
        if !self.try_acquire() {
            tracing::debug!("Throttling request to {}", self.kind);
            self.inner.until_ready().await;
        }
    }

    /// Take one request from the budget without waiting
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }
}

impl std::fmt::Debug for SourceLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLimiter").field("kind", &self.kind).finish()
    }
}

/// The three per-source budgets
#[derive(Debug, Clone)]
pub struct SourceLimiters {
    pub marketplace: SourceLimiter,
    pub bibliographic: SourceLimiter,
    pub catalog: SourceLimiter,
}

impl SourceLimiters {
    pub fn from_config(sources: &SourcesConfig) -> Self {
        let make = |kind| SourceLimiter::per_second(kind, sources.requests_per_second(kind));
        Self {
            marketplace: make(SourceKind::MarketplaceSearch),
            bibliographic: make(SourceKind::BibliographicApi),
            catalog: make(SourceKind::CatalogApi),
        }
    }

    pub fn get(&self, kind: SourceKind) -> &SourceLimiter {
        match kind {
            SourceKind::MarketplaceSearch => &self.marketplace,
            SourceKind::BibliographicApi => &self.bibliographic,
            SourceKind::CatalogApi => &self.catalog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_of_one() {
        let limiter = SourceLimiter::per_second(SourceKind::CatalogApi, 0.5);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_clones_share_budget() {
        let limiter = SourceLimiter::per_second(SourceKind::MarketplaceSearch, 0.1);
        let clone = limiter.clone();
        assert!(limiter.try_acquire());
        assert!(!clone.try_acquire());
    }

    #[test]
    fn test_nonsense_rate_is_clamped() {
        let limiter = SourceLimiter::per_second(SourceKind::CatalogApi, f64::NAN);
        assert!(limiter.try_acquire());
        let zero = SourceLimiter::per_second(SourceKind::CatalogApi, 0.0);
        assert!(zero.try_acquire());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = SourceLimiter::per_second(SourceKind::BibliographicApi, 50.0);
        let start = std::time::Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_limiters_from_config() {
        let limiters = SourceLimiters::from_config(&SourcesConfig::default());
        assert_eq!(limiters.get(SourceKind::CatalogApi).kind(), SourceKind::CatalogApi);
    }
}
