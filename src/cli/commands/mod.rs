//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `resolve`: Single and batch ASIN resolution
//! - `cache`: Cache statistics and maintenance
//! - `init-config`: Write a default config file

mod cache;
mod resolve;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;

use crate::cache::AsinCache;
use crate::config::{self, Config, ConfigError};
use crate::error::ResultExt;
use crate::resolver::Resolver;

pub use cache::{cmd_cache_cleanup, cmd_cache_clear, cmd_cache_stats};
pub use resolve::{cmd_batch, cmd_resolve};

/// ASIN Finder CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: <config dir>/asin-finder/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve the ASIN of one book
    Resolve {
        /// Book title
        #[arg(short, long, default_value = "")]
        title: String,
        /// Author name
        #[arg(short, long)]
        author: Option<String>,
        /// ISBN-10 or ISBN-13
        #[arg(short, long)]
        isbn: Option<String>,
        /// Print every step of the resolution
        #[arg(short, long)]
        verbose: bool,
        /// Only accept exact title/author matches
        #[arg(long)]
        no_fuzzy: bool,
        /// Fuzzy similarity threshold (0.0-1.0)
        #[arg(long)]
        threshold: Option<f32>,
        /// Bibliographic API key (or set GOOGLE_BOOKS_API_KEY env var)
        #[arg(long, env = "GOOGLE_BOOKS_API_KEY")]
        api_key: Option<String>,
    },
    /// Resolve every query in a file (one per line: title<TAB>author<TAB>isbn)
    Batch {
        /// Path to the query file
        file: PathBuf,
        /// Number of resolutions in flight
        #[arg(short = 'j', long, default_value = "4")]
        concurrency: usize,
        /// Only accept exact title/author matches
        #[arg(long)]
        no_fuzzy: bool,
        /// Bibliographic API key (or set GOOGLE_BOOKS_API_KEY env var)
        #[arg(long, env = "GOOGLE_BOOKS_API_KEY")]
        api_key: Option<String>,
    },
    /// Inspect or maintain the ASIN cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Write a config file with default settings
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Cache maintenance actions
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Show entry counts
    Stats,
    /// Delete every entry
    Clear,
    /// Delete expired entries
    Cleanup,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = load_config(cli.config.as_deref());

    match &cli.command {
        Commands::Resolve {
            title,
            author,
            isbn,
            verbose,
            no_fuzzy,
            threshold,
            api_key,
        } => cmd_resolve(
            &rt,
            config,
            title,
            author.as_deref(),
            isbn.as_deref(),
            *verbose,
            *no_fuzzy,
            *threshold,
            api_key.as_deref(),
        ),
        Commands::Batch {
            file,
            concurrency,
            no_fuzzy,
            api_key,
        } => cmd_batch(
            &rt,
            config,
            file,
            *concurrency,
            *no_fuzzy,
            api_key.as_deref(),
        ),
        Commands::Cache { action } => match action {
            CacheCommand::Stats => cmd_cache_stats(&rt, &config),
            CacheCommand::Clear => cmd_cache_clear(&rt, &config),
            CacheCommand::Cleanup => cmd_cache_cleanup(&rt, &config),
        },
        Commands::InitConfig { force } => {
            let path = cmd_init_config(cli.config.as_deref(), *force)?;
            println!("✓ Wrote default config to {}", path.display());
            Ok(())
        }
    }
}

/// Write the default configuration to `path` (or the platform location)
pub fn cmd_init_config(path: Option<&Path>, force: bool) -> crate::Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config::config_path().ok_or(ConfigError::NoConfigDir)?,
    };
    if path.exists() && !force {
        return Err(ConfigError::Exists(path).into());
    }

    config::save_to(&Config::default(), &path)?;
    Ok(path)
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Load the config file given on the command line, or the default one
pub(crate) fn load_config(path: Option<&Path>) -> Config {
    match path {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

/// Open the configured cache, importing the legacy JSON cache if present
pub(crate) async fn open_cache(config: &Config) -> crate::Result<AsinCache> {
    let path = config.cache.resolved_path();
    AsinCache::open_with_legacy(&path, &config.cache.resolved_legacy_path(), config.cache.ttl())
        .await
        .with_context(format!("Failed to open cache {}", path.display()))
}

/// Build a resolver backed by the configured cache.
///
/// A key given on the command line overrides the configured one.
pub(crate) async fn open_resolver(
    mut config: Config,
    api_key: Option<&str>,
) -> crate::Result<Resolver> {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config.credentials.bibliographic_api_key = Some(key.to_string());
    }

    let cache = open_cache(&config).await?;
    Resolver::from_config(&config, Some(Arc::new(cache)))
        .with_context("Failed to build HTTP sources")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_parse_resolve_command() {
        let cli = Cli::parse_from([
            "asin-finder",
            "resolve",
            "--title",
            "Mistborn",
            "--author",
            "Brandon Sanderson",
            "--no-fuzzy",
            "-v",
        ]);

        match cli.command {
            Commands::Resolve {
                title,
                author,
                isbn,
                verbose,
                no_fuzzy,
                threshold,
                ..
            } => {
                assert_eq!(title, "Mistborn");
                assert_eq!(author.as_deref(), Some("Brandon Sanderson"));
                assert!(isbn.is_none());
                assert!(verbose);
                assert!(no_fuzzy);
                assert!(threshold.is_none());
            }
            _ => panic!("Expected resolve command"),
        }
    }

    #[test]
    fn test_parse_cache_command_with_global_config() {
        let cli = Cli::parse_from(["asin-finder", "cache", "stats", "--config", "/tmp/a.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.toml")));
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheCommand::Stats
            }
        ));
    }

    #[test]
    fn test_init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert_eq!(cmd_init_config(Some(&path), false).unwrap(), path);
        let loaded = config::load_from(&path);
        assert_eq!(loaded.cache.ttl_days, Config::default().cache.ttl_days);

        let err = cmd_init_config(Some(&path), false).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Exists(_))));
        assert!(cmd_init_config(Some(&path), true).is_ok());
    }

    #[tokio::test]
    async fn test_open_cache_error_has_context() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the cache directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let mut config = Config::default();
        config.cache.path = Some(blocker.join("cache.db"));

        let err = open_cache(&config).await.unwrap_err();
        assert!(matches!(err, Error::WithContext { .. }));
        assert!(err.to_string().starts_with("Failed to open cache"));
    }

    #[tokio::test]
    async fn test_open_cache_in_configured_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.cache.path = Some(dir.path().join("nested").join("cache.db"));

        let cache = open_cache(&config).await.unwrap();
        assert_eq!(cache.path(), dir.path().join("nested").join("cache.db"));
    }
}
