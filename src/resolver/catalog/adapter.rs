//! Adapter layer: convert catalog records to candidates

use super::dto::{Edition, SearchResponse};
use crate::resolver::domain::{Candidate, SourceKind};
use crate::resolver::validate::normalize_asin;

/// Work-level search results considered
pub const MAX_SEARCH_DOCS: usize = 5;

const SEARCH_TOP_CONFIDENCE: f32 = 0.85;
const SEARCH_RANK_STEP: f32 = 0.05;

const AMAZON_RECORD_PREFIX: &str = "amazon:";

/// Identifiers listed on an edition fetched by ISBN. These are exact.
pub fn edition_candidates(edition: &Edition) -> Vec<Candidate> {
    let title = match (&edition.title, &edition.subtitle) {
        (Some(title), Some(subtitle)) => format!("{title}: {subtitle}"),
        (Some(title), None) => title.clone(),
        (None, _) => String::new(),
    };

    let from_records = edition
        .source_records
        .iter()
        .filter_map(|record| record.strip_prefix(AMAZON_RECORD_PREFIX));

    let mut seen: Vec<String> = Vec::new();
    for raw in edition.identifiers.amazon.iter().map(String::as_str).chain(from_records) {
        let token = raw.trim();
        if !token.is_empty() && !seen.iter().any(|s| s.eq_ignore_ascii_case(token)) {
            seen.push(token.to_string());
        }
    }

    seen.into_iter()
        .map(|asin| {
            Candidate::new(asin, SourceKind::CatalogApi, 1.0)
                .with_metadata(&title, "")
                .by_isbn()
        })
        .collect()
}

/// One candidate per matching work, ranked by result position
pub fn search_candidates(response: &SearchResponse) -> Vec<Candidate> {
    response
        .docs
        .iter()
        .filter_map(|doc| {
            let ids: Vec<&str> = doc
                .id_amazon
                .iter()
                .map(|id| id.trim())
                .filter(|id| !id.is_empty())
                .collect();
            // Prefer a well-formed identifier; otherwise let validation report the first
            let asin = ids
                .iter()
                .find(|id| normalize_asin(id).is_some())
                .or_else(|| ids.first())?;
            Some((doc, asin.to_string()))
        })
        .take(MAX_SEARCH_DOCS)
        .enumerate()
        .map(|(rank, (doc, asin))| {
            let confidence = SEARCH_TOP_CONFIDENCE - rank as f32 * SEARCH_RANK_STEP;
            Candidate::new(asin, SourceKind::CatalogApi, confidence).with_metadata(
                doc.title.clone().unwrap_or_default(),
                doc.author_name.join(", "),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::domain::MatchBasis;

    #[test]
    fn test_edition_candidates() {
        let edition: Edition = serde_json::from_str(
            r#"{
                "key": "/books/OL24381214M",
                "title": "The Way of Kings",
                "identifiers": {"amazon": ["B003P2WO5E"], "goodreads": ["7235533"]},
                "source_records": ["amazon:B003P2WO5E", "amazon:0765326353", "marc:somewhere"],
                "authors": [{"key": "/authors/OL1394865A"}]
            }"#,
        )
        .unwrap();

        let candidates = edition_candidates(&edition);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].asin, "B003P2WO5E");
        assert_eq!(candidates[0].confidence, 1.0);
        assert_eq!(candidates[0].basis, MatchBasis::Isbn);
        assert_eq!(candidates[0].raw_title, "The Way of Kings");
        // The ISBN-10 record is passed on for validation to reject
        assert_eq!(candidates[1].asin, "0765326353");
    }

    #[test]
    fn test_edition_without_identifiers() {
        let edition: Edition = serde_json::from_str(r#"{"title": "Obscure"}"#).unwrap();
        assert!(edition_candidates(&edition).is_empty());
    }

    #[test]
    fn test_search_candidates() {
        let response: SearchResponse = serde_json::from_str(
            r#"{
                "numFound": 3,
                "docs": [
                    {"key": "/works/OL1", "title": "Mistborn", "author_name": ["Brandon Sanderson"],
                     "id_amazon": ["", "0765311780", "B001QKBHG4"]},
                    {"key": "/works/OL2", "title": "Mistborn Trilogy"},
                    {"key": "/works/OL3", "title": "The Well of Ascension", "author_name": ["Brandon Sanderson"],
                     "id_amazon": ["B000UZQHWI"]}
                ]
            }"#,
        )
        .unwrap();

        let candidates = search_candidates(&response);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].asin, "B001QKBHG4");
        assert_eq!(candidates[0].confidence, 0.85);
        assert_eq!(candidates[0].raw_author, "Brandon Sanderson");
        assert_eq!(candidates[1].asin, "B000UZQHWI");
        assert!(candidates[1].confidence < 0.85);
        assert_eq!(candidates[1].basis, MatchBasis::Text);
    }
}
