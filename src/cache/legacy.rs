//! One-shot import of the old flat JSON cache.
//!
//! The old format is a single object keyed by `"title|author"`. Values are
//! either a bare ASIN string or `{"asin": ..., "source": ...}`. Keys are
//! re-fingerprinted on import, entries with an invalid ASIN are skipped, and
//! the file is renamed to `*.migrated` once its contents are committed.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{AsinCache, CacheEntry, CacheError};
use crate::query::fingerprint_parts;
use crate::resolver::validate::normalize_asin;

/// Filename the old tool used, next to the database
pub const LEGACY_FILE_NAME: &str = "asin_cache.json";

/// Source recorded for imported entries without one
pub const LEGACY_SOURCE: &str = "legacy";

const LEGACY_CONFIDENCE: f32 = 1.0;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LegacyValue {
    Asin(String),
    Record {
        asin: String,
        #[serde(default)]
        source: Option<String>,
    },
}

/// `asin_cache.json` beside the database file
pub fn default_legacy_path(cache_path: &Path) -> PathBuf {
    cache_path.with_file_name(LEGACY_FILE_NAME)
}

/// Import `legacy_path` into `cache`. Returns the number of entries imported;
/// a missing file imports nothing.
pub async fn migrate(cache: &AsinCache, legacy_path: &Path) -> Result<usize, CacheError> {
    if !legacy_path.is_file() {
        return Ok(0);
    }

    let contents = std::fs::read_to_string(legacy_path)?;
    let entries = parse(&contents, cache.default_ttl())?;
    cache.put_many(&entries).await?;

    let mut migrated = OsString::from(legacy_path.as_os_str());
    migrated.push(".migrated");
    std::fs::rename(legacy_path, &migrated)?;

    tracing::debug!(
        "Legacy cache {} imported and renamed",
        legacy_path.display()
    );
    Ok(entries.len())
}

fn parse(contents: &str, ttl: std::time::Duration) -> Result<Vec<CacheEntry>, CacheError> {
    let raw: BTreeMap<String, LegacyValue> =
        serde_json::from_str(contents).map_err(|e| CacheError::Legacy(e.to_string()))?;

    let mut entries = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let (asin, source) = match value {
            LegacyValue::Asin(asin) => (asin, None),
            LegacyValue::Record { asin, source } => (asin, source),
        };

        let Some(asin) = normalize_asin(&asin) else {
            tracing::debug!("Skipping legacy entry '{}': '{}' is not an ASIN", key, asin);
            continue;
        };

        let (title, author) = match key.split_once('|') {
            Some((title, author)) => (title, Some(author)),
            None => (key.as_str(), None),
        };
        let fingerprint = fingerprint_parts(title, author, None);
        if fingerprint.is_empty() {
            continue;
        }

        let source = source
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| LEGACY_SOURCE.to_string());
        entries.push(CacheEntry::new(fingerprint, asin, source, LEGACY_CONFIDENCE, ttl));
    }

    Ok(entries)
}
