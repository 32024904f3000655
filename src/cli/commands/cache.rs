//! Cache statistics and maintenance commands.

use tokio::runtime::Runtime;

use crate::config::Config;

use super::open_cache;

/// Show cache entry counts
pub fn cmd_cache_stats(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let cache = open_cache(config).await?;
        let stats = cache.stats().await?;

        println!("Cache: {}", cache.path().display());
        println!("  Entries: {}", stats.total);
        println!("  Live:    {}", stats.live);
        println!("  Expired: {}", stats.expired);

        if !stats.by_source.is_empty() {
            println!();
            println!("By source:");
            for (source, count) in &stats.by_source {
                println!("  {:<20} {}", source, count);
            }
        }
        Ok(())
    })
}

/// Delete every cache entry
pub fn cmd_cache_clear(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let cache = open_cache(config).await?;
        let removed = cache.clear().await?;
        println!("✓ Cleared {} entries", removed);
        Ok(())
    })
}

/// Delete expired cache entries
pub fn cmd_cache_cleanup(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let cache = open_cache(config).await?;
        let removed = cache.cleanup_expired().await?;
        println!("✓ Removed {} expired entries", removed);
        Ok(())
    })
}
