//! Open Library integration
//!
//! Exact lookups by ISBN, with a title/author work search as fallback.
//!
//! API docs: https://openlibrary.org/developers/api

pub mod dto;
mod adapter;
mod client;

pub use adapter::{edition_candidates, search_candidates};
pub use client::CatalogClient;
