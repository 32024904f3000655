//! Resolver service - orchestrates one ASIN resolution end to end
//!
//! This is the high-level API:
//! 1. Check the cache for the query fingerprint
//! 2. Walk query variants, asking each source in priority order
//! 3. Validate candidates and arbitrate between them
//! 4. Cache the winner
//!
//! Concurrent calls for the same query share one in-flight resolution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::Instrument;

use super::arbiter::{self, ArbiterSettings, Verdict};
use super::bibliographic::BibliographicClient;
use super::catalog::CatalogClient;
use super::domain::{
    Candidate, MatchKind, Resolution, SourceError, SourceFailure, SourceKind, TraceEvent,
};
use super::limiter::SourceLimiters;
use super::marketplace::MarketplaceClient;
use super::retry::RetryPolicy;
use super::source::Source;
use super::validate;
use crate::cache::AsinCache;
use crate::config::Config;
use crate::query::{Normalizer, Query};

/// Source name reported for cache hits
pub const CACHE_SOURCE: &str = "cache";

/// Source name for failures outside the adapters
pub const RESOLVER_SOURCE: &str = "resolver";

/// Per-call options. `None` falls back to the configured value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolveOptions {
    /// Record a step-by-step trace in the result
    pub verbose: bool,
    pub fuzzy: Option<bool>,
    pub fuzzy_threshold: Option<f32>,
}

impl ResolveOptions {
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            ..Self::default()
        }
    }
}

type InFlightMap = Mutex<HashMap<String, Arc<OnceCell<Resolution>>>>;

/// Resolves queries to ASINs
pub struct Resolver {
    /// Enabled sources in priority order
    sources: Vec<Source>,
    cache: Option<Arc<AsinCache>>,
    normalizer: Normalizer,
    retry: RetryPolicy,
    arbiter: ArbiterSettings,
    /// Threshold used when fuzzy matching is switched on per call
    fuzzy_threshold: f32,
    skip_threshold: f32,
    cache_ttl: Duration,
    in_flight: InFlightMap,
}

impl Resolver {
    /// Build a resolver from explicit sources (already in priority order)
    pub fn new(sources: Vec<Source>, cache: Option<Arc<AsinCache>>, config: &Config) -> Self {
        Self {
            sources,
            cache,
            normalizer: Normalizer::new(config.matching.max_variants),
            retry: RetryPolicy::from(&config.retry),
            arbiter: ArbiterSettings::from_config(config),
            fuzzy_threshold: config.matching.fuzzy_threshold,
            skip_threshold: config.matching.skip_threshold,
            cache_ttl: config.cache.ttl(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Build the HTTP sources described by `config`
    pub fn from_config(
        config: &Config,
        cache: Option<Arc<AsinCache>>,
    ) -> Result<Self, crate::error::Error> {
        let sources_config = &config.sources;
        let limiters = SourceLimiters::from_config(sources_config);
        let priority = sources_config.enabled_in_priority();

        let marketplace = Arc::new(MarketplaceClient::new(
            sources_config.base_url(SourceKind::MarketplaceSearch),
            sources_config.timeout(SourceKind::MarketplaceSearch),
            limiters.get(SourceKind::MarketplaceSearch).clone(),
        )?);

        let mut sources = Vec::with_capacity(priority.len());
        for kind in &priority {
            let source = match kind {
                SourceKind::MarketplaceSearch => Source::Marketplace(Arc::clone(&marketplace)),
                SourceKind::BibliographicApi => {
                    let client = BibliographicClient::new(
                        sources_config.base_url(*kind),
                        config.credentials.bibliographic_api_key.clone(),
                        sources_config.timeout(*kind),
                        limiters.get(*kind).clone(),
                    )?;
                    // ISBN mapping scrapes the marketplace, so only when it is enabled
                    if priority.contains(&SourceKind::MarketplaceSearch) {
                        Source::Bibliographic(client.with_marketplace(Arc::clone(&marketplace)))
                    } else {
                        Source::Bibliographic(client)
                    }
                }
                SourceKind::CatalogApi => Source::Catalog(CatalogClient::new(
                    sources_config.base_url(*kind),
                    sources_config.timeout(*kind),
                    limiters.get(*kind).clone(),
                )?),
            };
            sources.push(source);
        }

        tracing::debug!("Resolver sources: {:?}", priority);
        Ok(Self::new(sources, cache, config))
    }

    pub fn cache(&self) -> Option<&Arc<AsinCache>> {
        self.cache.as_ref()
    }

    /// Resolve one query. Never fails; a missing ASIN comes with diagnostics.
    pub async fn resolve(&self, query: &Query, opts: ResolveOptions) -> Resolution {
        let start = Instant::now();

        if query.is_empty() {
            let mut resolution = Resolution::failed(vec![SourceFailure::new(
                RESOLVER_SOURCE,
                "query has neither a title nor an ISBN",
            )]);
            resolution.elapsed = start.elapsed();
            return resolution;
        }

        let fingerprint = query.fingerprint();
        let flight = InFlight::join(&self.in_flight, self.flight_key(&fingerprint, opts));

        let span = tracing::info_span!("resolve", fingerprint = %fingerprint);
        let mut resolution = flight
            .cell
            .get_or_init(|| self.run(query, &fingerprint, opts).instrument(span))
            .await
            .clone();
        if !opts.verbose {
            resolution.trace.clear();
        }
        resolution.elapsed = start.elapsed();
        resolution
    }

    /// Resolve with an overall deadline. Outstanding requests are dropped when
    /// it passes; the cache is left untouched.
    pub async fn resolve_with_timeout(
        &self,
        query: &Query,
        opts: ResolveOptions,
        deadline: Duration,
    ) -> Resolution {
        let start = Instant::now();
        match tokio::time::timeout(deadline, self.resolve(query, opts)).await {
            Ok(resolution) => resolution,
            Err(_) => {
                tracing::info!("Resolution of '{}' timed out", query.fingerprint());
                let mut resolution = Resolution::failed(vec![SourceFailure::new(
                    RESOLVER_SOURCE,
                    "resolution timed out",
                )]);
                resolution.elapsed = start.elapsed();
                resolution
            }
        }
    }

    /// Resolve many queries with at most `concurrency` in flight.
    /// Results are in input order.
    pub async fn resolve_batch(
        &self,
        queries: &[Query],
        opts: ResolveOptions,
        concurrency: usize,
    ) -> Vec<Resolution> {
        futures::stream::iter(queries.iter().map(|query| self.resolve(query, opts)))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn run(&self, query: &Query, fingerprint: &str, opts: ResolveOptions) -> Resolution {
        // Always recorded: a verbose caller may share this round
        let mut trace = Vec::new();

        if let Some(cache) = &self.cache {
            match cache.get(fingerprint).await {
                Ok(Some(entry)) => {
                    tracing::debug!("Cache hit: {} -> {}", fingerprint, entry.asin);
                    trace.push(TraceEvent::CacheHit {
                        fingerprint: fingerprint.to_string(),
                    });
                    return Resolution {
                        asin: Some(entry.asin),
                        source: CACHE_SOURCE.to_string(),
                        confidence: Some(entry.confidence),
                        match_kind: Some(MatchKind::Cached),
                        elapsed: Duration::ZERO,
                        errors: Vec::new(),
                        trace: trace,
                    };
                }
                Ok(None) => trace.push(TraceEvent::CacheMiss {
                    fingerprint: fingerprint.to_string(),
                }),
                Err(e) => {
                    tracing::warn!("Cache read failed, resolving from sources: {}", e);
                    trace.push(TraceEvent::CacheError {
                        message: e.to_string(),
                    });
                }
            }
        }

        let settings = self.arbiter_settings(opts);
        let mut diagnostics = Diagnostics::default();
        let verdict = self
            .search(query, &settings, &mut diagnostics, &mut trace)
            .await;

        match verdict {
            Verdict::Accepted(decision) => {
                tracing::info!("Resolved '{}' -> {}", fingerprint, decision);
                trace.push(TraceEvent::Arbitration {
                    summary: decision.to_string(),
                });

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache
                        .put(
                            fingerprint,
                            &decision.asin,
                            decision.source.as_str(),
                            decision.confidence,
                            Some(self.cache_ttl),
                        )
                        .await
                    {
                        tracing::warn!("Failed to cache {} for '{}': {}", decision.asin, fingerprint, e);
                        trace.push(TraceEvent::CacheError {
                            message: e.to_string(),
                        });
                    }
                }

                Resolution {
                    asin: Some(decision.asin),
                    source: decision.source.to_string(),
                    confidence: Some(decision.confidence),
                    match_kind: Some(decision.match_kind),
                    elapsed: Duration::ZERO,
                    errors: diagnostics.into_failures(false),
                    trace: trace,
                }
            }
            Verdict::Rejected { summary } => {
                tracing::info!("No ASIN for '{}': {}", fingerprint, summary);
                trace.push(TraceEvent::Arbitration { summary });
                let mut resolution = Resolution::failed(diagnostics.into_failures(true));
                resolution.trace = trace;
                resolution
            }
        }
    }

    /// Walk variants x sources until a confident exact match shows up or a
    /// finished variant round produces an acceptable winner
    async fn search(
        &self,
        query: &Query,
        settings: &ArbiterSettings,
        diagnostics: &mut Diagnostics,
        trace: &mut Vec<TraceEvent>,
    ) -> Verdict {
        let mut candidates: Vec<Candidate> = Vec::new();
        let variants = self.normalizer.variants(query);

        'variants: for (index, variant) in variants.iter().enumerate() {
            trace.push(TraceEvent::Variant {
                index,
                description: variant.describe(),
            });

            for source in &self.sources {
                let kind = source.kind();
                let outcome = self.retry.run(|| source.search(&variant)).await;
                let found = outcome.result.as_ref().map(Vec::len).ok();

                for record in &outcome.history {
                    let result = match (&record.error, found) {
                        (Some(e), _) => e.to_string(),
                        (None, Some(n)) => format!("{n} candidate(s)"),
                        (None, None) => "ok".to_string(),
                    };
                    tracing::debug!(
                        "[{}] variant #{} attempt {}: {}",
                        kind,
                        index,
                        record.attempt,
                        result
                    );
                    trace.push(TraceEvent::Attempt {
                        source: kind,
                        variant: index,
                        attempt: record.attempt,
                        outcome: result,
                    });
                    if let Some(delay) = record.retry_after {
                        trace.push(TraceEvent::RetryScheduled {
                            source: kind,
                            attempt: record.attempt,
                            delay,
                        });
                    }
                }

                let raw = match outcome.result {
                    Ok(raw) => raw,
                    Err(e) => {
                        diagnostics.failed(kind, e);
                        continue;
                    }
                };

                let (valid, rejected) = validate::partition(raw);
                for r in rejected {
                    tracing::debug!("[{}] dropped '{}': {}", r.source, r.asin, r.reason);
                    trace.push(TraceEvent::CandidateRejected {
                        source: r.source,
                        asin: r.asin,
                        reason: r.reason.to_string(),
                    });
                }

                if valid.is_empty() {
                    diagnostics.no_valid(kind);
                    continue;
                }
                diagnostics.found(kind);

                let early = valid
                    .iter()
                    .find(|c| c.confidence >= self.skip_threshold && arbiter::is_exact(query, c))
                    .map(|c| (c.asin.clone(), c.confidence));
                candidates.extend(valid);

                if let Some((asin, confidence)) = early {
                    trace.push(TraceEvent::EarlyExit {
                        source: kind,
                        asin,
                        confidence,
                    });
                    break 'variants;
                }
            }

            if !candidates.is_empty() {
                let verdict = arbiter::arbitrate(query, &candidates, settings);
                if matches!(verdict, Verdict::Accepted(_)) {
                    return verdict;
                }
            }
        }

        arbiter::arbitrate(query, &candidates, settings)
    }

    /// Callers whose options lead to the same arbitration share a round
    fn flight_key(&self, fingerprint: &str, opts: ResolveOptions) -> String {
        format!(
            "{fingerprint}\u{1f}{:?}",
            self.arbiter_settings(opts).fuzzy_threshold
        )
    }

    fn arbiter_settings(&self, opts: ResolveOptions) -> ArbiterSettings {
        let mut settings = self.arbiter.clone();
        let threshold = opts.fuzzy_threshold.unwrap_or(self.fuzzy_threshold);
        settings.fuzzy_threshold = match opts.fuzzy {
            Some(false) => None,
            Some(true) => Some(threshold),
            None => settings.fuzzy_threshold.map(|_| threshold),
        };
        settings
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("sources", &self.sources)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Removes the shared in-flight slot once it has served its purpose
struct InFlight<'a> {
    map: &'a InFlightMap,
    key: String,
    cell: Arc<OnceCell<Resolution>>,
}

impl<'a> InFlight<'a> {
    /// Share the slot for `key`, creating it if nobody is resolving it yet
    fn join(map: &'a InFlightMap, key: String) -> Self {
        let cell = Arc::clone(map.lock().entry(key.clone()).or_default());
        Self { map, key, cell }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        let Some(current) = map.get(&self.key) else {
            return;
        };
        // Keep an unfinished slot while other callers are still waiting on it.
        // The map holds one reference and this guard the other.
        let last_waiter = Arc::strong_count(&self.cell) <= 2;
        if Arc::ptr_eq(current, &self.cell) && (self.cell.initialized() || last_waiter) {
            map.remove(&self.key);
        }
    }
}

#[derive(Debug)]
enum SourceStatus {
    Found,
    NoValidCandidates,
    Failed(SourceError),
}

/// One status per attempted source, in the order sources were first tried
#[derive(Debug, Default)]
struct Diagnostics {
    entries: Vec<(SourceKind, SourceStatus)>,
}

impl Diagnostics {
    fn entry(&mut self, kind: SourceKind) -> Option<&mut SourceStatus> {
        self.entries
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, status)| status)
    }

    fn found(&mut self, kind: SourceKind) {
        match self.entry(kind) {
            Some(status) => *status = SourceStatus::Found,
            None => self.entries.push((kind, SourceStatus::Found)),
        }
    }

    fn no_valid(&mut self, kind: SourceKind) {
        match self.entry(kind) {
            Some(status) if matches!(status, SourceStatus::Failed(SourceError::NotFound)) => {
                *status = SourceStatus::NoValidCandidates;
            }
            Some(_) => {}
            None => self.entries.push((kind, SourceStatus::NoValidCandidates)),
        }
    }

    /// A real failure replaces an earlier "no results"; a success is kept
    fn failed(&mut self, kind: SourceKind, error: SourceError) {
        let is_not_found = error == SourceError::NotFound;
        match self.entry(kind) {
            Some(SourceStatus::Found) => {}
            Some(status)
                if !is_not_found
                    && matches!(
                        status,
                        SourceStatus::Failed(SourceError::NotFound) | SourceStatus::NoValidCandidates
                    ) =>
            {
                *status = SourceStatus::Failed(error);
            }
            Some(_) => {}
            None => self.entries.push((kind, SourceStatus::Failed(error))),
        }
    }

    /// `include_found` also reports sources whose candidates lost arbitration
    fn into_failures(self, include_found: bool) -> Vec<SourceFailure> {
        self.entries
            .into_iter()
            .filter_map(|(kind, status)| {
                let message = match status {
                    SourceStatus::Found if include_found => {
                        "no candidate cleared threshold".to_string()
                    }
                    SourceStatus::Found => return None,
                    SourceStatus::NoValidCandidates => "no valid ASIN in results".to_string(),
                    SourceStatus::Failed(e) => e.to_string(),
                };
                Some(SourceFailure::new(kind.as_str(), message))
            })
            .collect()
    }
}
