//! ASIN Finder - resolve a book's marketplace identifier from its title,
//! author or ISBN.
//!
//! Several independent sources are queried with progressively looser
//! phrasings of the query; their answers are validated, reconciled and the
//! winner is kept in a durable SQLite cache.
//!
//! ```ignore
//! let config = asin_finder::config::load();
//! let cache = AsinCache::open(config.cache.resolved_path(), config.cache.ttl()).await?;
//! let resolver = Resolver::from_config(&config, Some(Arc::new(cache)))?;
//! let result = resolver
//!     .resolve(&Query::new("Mistborn").with_author("Brandon Sanderson"), ResolveOptions::default())
//!     .await;
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod query;
pub mod resolver;
#[cfg(test)]
pub mod test_utils;

pub use error::{Error, Result};
