//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\asin-finder\config.toml
//! - macOS: ~/Library/Application Support/asin-finder/config.toml
//! - Linux: ~/.config/asin-finder/config.toml
//!
//! Every section is optional; missing values fall back to defaults. The
//! matching weights and thresholds are tuning knobs, not load-bearing
//! constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::resolver::SourceKind;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API credentials
    pub credentials: Credentials,

    /// External source endpoints and budgets
    pub sources: SourcesConfig,

    /// Retry/backoff policy applied to every source call
    pub retry: RetryConfig,

    /// Arbitration thresholds
    pub matching: MatchingConfig,

    /// Cache store settings
    pub cache: CacheConfig,
}

/// API credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Key for the bibliographic metadata API (optional, raises quota)
    pub bibliographic_api_key: Option<String>,
}

/// Source selection and per-source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Order in which sources are consulted for each variant
    pub priority: Vec<SourceKind>,

    pub marketplace: SourceSettings,
    pub bibliographic: SourceSettings,
    pub catalog: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            priority: SourceKind::ALL.to_vec(),
            marketplace: SourceSettings::default(),
            bibliographic: SourceSettings::default(),
            catalog: SourceSettings::default(),
        }
    }
}

/// Built-in endpoint and budget for a source: (base url, timeout secs, req/s, weight).
/// Search-style scraping gets a longer timeout than the metadata APIs.
fn builtin(kind: SourceKind) -> (&'static str, u64, f64, f32) {
    match kind {
        SourceKind::MarketplaceSearch => ("https://www.amazon.com", 15, 0.5, 1.0),
        SourceKind::BibliographicApi => ("https://www.googleapis.com/books/v1", 10, 2.0, 0.85),
        SourceKind::CatalogApi => ("https://openlibrary.org", 10, 1.0, 0.9),
    }
}

impl SourcesConfig {
    pub fn settings(&self, kind: SourceKind) -> &SourceSettings {
        match kind {
            SourceKind::MarketplaceSearch => &self.marketplace,
            SourceKind::BibliographicApi => &self.bibliographic,
            SourceKind::CatalogApi => &self.catalog,
        }
    }

    pub fn base_url(&self, kind: SourceKind) -> String {
        self.settings(kind)
            .base_url
            .clone()
            .unwrap_or_else(|| builtin(kind).0.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self, kind: SourceKind) -> Duration {
        let secs = self.settings(kind).timeout_secs.unwrap_or(builtin(kind).1);
        Duration::from_secs(secs.max(1))
    }

    pub fn requests_per_second(&self, kind: SourceKind) -> f64 {
        self.settings(kind)
            .requests_per_second
            .unwrap_or(builtin(kind).2)
    }

    pub fn weight(&self, kind: SourceKind) -> f32 {
        self.settings(kind)
            .weight
            .unwrap_or(builtin(kind).3)
            .clamp(0.0, 1.0)
    }

    /// Enabled sources in priority order, without duplicates
    pub fn enabled_in_priority(&self) -> Vec<SourceKind> {
        let mut out: Vec<SourceKind> = Vec::with_capacity(SourceKind::ALL.len());
        for kind in &self.priority {
            if self.settings(*kind).enabled && !out.contains(kind) {
                out.push(*kind);
            }
        }
        out
    }
}

/// Per-source overrides; unset values use the source's built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub base_url: Option<String>,

    /// Per-call timeout
    pub timeout_secs: Option<u64>,

    /// Process-wide request budget toward this source
    pub requests_per_second: Option<f64>,

    /// Source reliability weight used by the arbiter (0.0 - 1.0)
    pub weight: Option<f32>,

    pub enabled: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: None,
            requests_per_second: None,
            weight: None,
            enabled: true,
        }
    }
}

/// Retry policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per source call, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Randomize delays to avoid synchronized retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

/// Arbitration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Accept fuzzy (non-exact) matches by default
    pub fuzzy: bool,

    /// Minimum title/author similarity for a fuzzy match
    pub fuzzy_threshold: f32,

    /// Minimum aggregate score for a fuzzy match
    pub min_score: f32,

    /// Exact candidates at or above this confidence stop the source sequence
    pub skip_threshold: f32,

    /// Upper bound on query variants per resolution
    pub max_variants: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy: true,
            fuzzy_threshold: 0.84,
            min_score: 0.5,
            skip_threshold: 0.95,
            max_variants: crate::query::normalize::DEFAULT_MAX_VARIANTS,
        }
    }
}

/// Cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Database file (default: user cache dir)
    pub path: Option<PathBuf>,

    /// Legacy flat JSON cache to import on first open (default: next to `path`)
    pub legacy_path: Option<PathBuf>,

    /// Lifetime of a cached resolution
    pub ttl_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            legacy_path: None,
            ttl_days: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_days) * 24 * 60 * 60)
    }

    /// Configured database path or the platform default
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(default_cache_path)
    }

    /// Configured legacy path or `asin_cache.json` beside the database
    pub fn resolved_legacy_path(&self) -> PathBuf {
        self.legacy_path
            .clone()
            .unwrap_or_else(|| crate::cache::legacy::default_legacy_path(&self.resolved_path()))
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("asin-finder"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Default cache database location
pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("asin-finder")
        .join("asin_cache.db")
}

/// Load configuration from the default location
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    match config_path() {
        Some(path) => load_from(&path),
        None => {
            tracing::warn!("Could not determine config directory, using defaults");
            Config::default()
        }
    }
}

/// Load configuration from a specific file, falling back to defaults
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let dir = config_dir().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &dir.join("config.toml"))
}

/// Save configuration to a specific file (write to temp, then rename)
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("{0} already exists (use --force to overwrite)")]
    Exists(PathBuf),

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[credentials]"));
        assert!(toml.contains("[sources.marketplace]"));
        assert!(toml.contains("[retry]"));
        assert!(toml.contains("[matching]"));
        assert!(toml.contains("[cache]"));
    }

    #[test]
    fn test_config_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.credentials.bibliographic_api_key = Some("key-123".to_string());
        config.matching.fuzzy_threshold = 0.9;
        config.sources.priority = vec![SourceKind::CatalogApi, SourceKind::MarketplaceSearch];

        save_to(&config, &path).unwrap();
        let loaded = load_from(&path);

        assert_eq!(
            loaded.credentials.bibliographic_api_key.as_deref(),
            Some("key-123")
        );
        assert_eq!(loaded.matching.fuzzy_threshold, 0.9);
        assert_eq!(
            loaded.sources.priority,
            vec![SourceKind::CatalogApi, SourceKind::MarketplaceSearch]
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[matching]
fuzzy_threshold = 0.7

[sources.catalog]
enabled = false
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.matching.fuzzy_threshold, 0.7);
        assert_eq!(config.matching.skip_threshold, 0.95);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.ttl_days, 30);
        assert_eq!(
            config.sources.enabled_in_priority(),
            vec![SourceKind::MarketplaceSearch, SourceKind::BibliographicApi]
        );
        // Partially specified tables keep their built-in endpoint
        assert_eq!(
            config.sources.base_url(SourceKind::CatalogApi),
            "https://openlibrary.org"
        );
    }

    #[test]
    fn test_source_overrides() {
        let toml = r#"
[sources.marketplace]
base_url = "http://localhost:9000/"
timeout_secs = 3
weight = 1.5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let kind = SourceKind::MarketplaceSearch;

        assert_eq!(config.sources.base_url(kind), "http://localhost:9000");
        assert_eq!(config.sources.timeout(kind), Duration::from_secs(3));
        assert_eq!(config.sources.weight(kind), 1.0);
        assert_eq!(
            config.sources.timeout(SourceKind::BibliographicApi),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not valid toml").unwrap();

        let config = load_from(&path);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_cache_paths() {
        let config = CacheConfig {
            path: Some(PathBuf::from("/tmp/books/asin_cache.db")),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_legacy_path(),
            PathBuf::from("/tmp/books/asin_cache.json")
        );
        assert_eq!(config.ttl(), Duration::from_secs(30 * 86_400));
    }
}
