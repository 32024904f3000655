//! Open Library Data Transfer Objects
//!
//! These types match what the edition and search endpoints return.
//! DO NOT use these types outside the catalog module - convert to domain types.
//!
//! API Reference: https://openlibrary.org/developers/api

use serde::{Deserialize, Serialize};

/// Edition record from `GET /isbn/{isbn}.json`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Edition {
    pub key: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    #[serde(default)]
    pub identifiers: Identifiers,
    /// Import provenance, e.g. `amazon:B001QKBHG4`
    #[serde(default)]
    pub source_records: Vec<String>,
    /// Author references (`/authors/OL...A`), not names
    #[serde(default)]
    pub authors: Vec<AuthorRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Identifiers {
    #[serde(default)]
    pub amazon: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorRef {
    pub key: String,
}

/// Response from `GET /search.json`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub num_found: u32,
    #[serde(default)]
    pub docs: Vec<SearchDoc>,
}

/// One work in search results (only the requested `fields`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchDoc {
    pub key: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub author_name: Vec<String>,
    #[serde(default)]
    pub id_amazon: Vec<String>,
}
