//! Marketplace search integration
//!
//! Scrapes the public product search page, trying several departments in turn
//! and rotating the client identity between requests. Result listings carry
//! the identifier in a `data-asin` attribute.

mod adapter;
mod client;

pub use adapter::parse_results;
pub use client::{Department, MarketplaceClient};
