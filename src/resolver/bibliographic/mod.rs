//! Books API integration
//!
//! Looks up volume records by ISBN or title/author and extracts marketplace
//! identifiers from them, directly or through a secondary ISBN lookup.
//!
//! API docs: https://developers.google.com/books/docs/v1/using

pub mod dto;
mod adapter;
mod client;

pub use adapter::{VolumeMatch, to_matches};
pub use client::{BibliographicClient, Strategy};
