//! Adapter layer: turn a marketplace result page into candidates
//!
//! The page layout is not a contract, so this file is the only place that
//! knows about it. Structured result listings are preferred; when none are
//! present we fall back to product links embedded anywhere in the page.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::resolver::domain::{Candidate, MatchBasis, SourceError, SourceKind};

/// Only the top of the result list is worth considering
const MAX_RESULTS: usize = 5;

/// Confidence of the first listing; each lower rank loses `RANK_STEP`
const TOP_CONFIDENCE: f32 = 0.95;
const RANK_STEP: f32 = 0.05;
const MIN_LISTING_CONFIDENCE: f32 = 0.6;

/// Identifiers scraped from bare product links carry no metadata
const LINK_CONFIDENCE: f32 = 0.5;

static RESULT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"div[data-component-type="s-search-result"][data-asin]"#)
        .expect("valid result selector")
});
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2").expect("valid title selector"));
static BYLINE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.a-row.a-size-base.a-color-secondary").expect("valid byline selector")
});
static PRODUCT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/dp/([A-Z0-9]{10})").expect("valid product link regex"));

const BOT_CHECK_MARKERS: [&str; 2] = [
    "/errors/validateCaptcha",
    "Type the characters you see in this image",
];

/// Parse a search result page. An empty vector means the page had no results.
pub fn parse_results(html: &str, basis: MatchBasis) -> Result<Vec<Candidate>, SourceError> {
    if BOT_CHECK_MARKERS.iter().any(|m| html.contains(m)) {
        // Bot check pages are served instead of throttling responses
        return Err(SourceError::RateLimited);
    }

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for result in document.select(&RESULT) {
        if candidates.len() >= MAX_RESULTS {
            break;
        }
        if is_sponsored(&result) {
            continue;
        }

        let asin = result.value().attr("data-asin").unwrap_or_default().trim();
        if asin.is_empty() || !seen.insert(asin.to_string()) {
            continue;
        }

        let title = result
            .select(&TITLE)
            .next()
            .map(|el| compact_text(&el))
            .unwrap_or_default();
        let author = result
            .select(&BYLINE)
            .next()
            .map(|el| parse_byline(&compact_text(&el)))
            .unwrap_or_default();

        let rank = candidates.len() as f32;
        let confidence = (TOP_CONFIDENCE - rank * RANK_STEP).max(MIN_LISTING_CONFIDENCE);

        let mut candidate = Candidate::new(asin, SourceKind::MarketplaceSearch, confidence)
            .with_metadata(title, author);
        candidate.basis = basis;
        candidates.push(candidate);
    }

    if candidates.is_empty() {
        candidates = product_links(html, basis);
    }

    Ok(candidates)
}

fn product_links(html: &str, basis: MatchBasis) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    PRODUCT_LINK
        .captures_iter(html)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|asin| seen.insert(*asin))
        .take(MAX_RESULTS)
        .map(|asin| {
            let mut candidate = Candidate::new(asin, SourceKind::MarketplaceSearch, LINK_CONFIDENCE);
            candidate.basis = basis;
            candidate
        })
        .collect()
}

fn is_sponsored(result: &ElementRef<'_>) -> bool {
    result
        .value()
        .attr("class")
        .is_some_and(|class| class.contains("AdHolder"))
}

fn compact_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// "by Brandon Sanderson | Jul 25, 2006" -> "Brandon Sanderson"
fn parse_byline(byline: &str) -> String {
    let first = byline.split('|').next().unwrap_or_default().trim();
    let without_by = first
        .strip_prefix("by ")
        .or_else(|| first.strip_prefix("By "))
        .unwrap_or(first);
    without_by.trim().to_string()
}
