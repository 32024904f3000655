//! Durable ASIN cache backed by SQLite.
//!
//! Maps query fingerprints to resolved ASINs with their provenance and an
//! expiry time. Writes are upserts, so there is at most one entry per
//! fingerprint. Expired entries read as misses and are removed by
//! [`AsinCache::cleanup_expired`]. Timestamps are stored as Unix
//! milliseconds, so sub-second TTLs hold.
//!
//! A corrupt database file is never fatal: it is moved aside as `*.corrupt`
//! and a fresh, empty store is created in its place, both on open and when
//! corruption shows up mid-session.
//!
//! # Example
//!
//! ```ignore
//! let cache = AsinCache::open("asin_cache.db", Duration::from_secs(30 * 86_400)).await?;
//! cache.put("mistborn|brandon sanderson", "B001QKBHG4", "marketplace-search", 0.95, None).await?;
//! let hit = cache.get("mistborn|brandon sanderson").await?;
//! ```

pub mod legacy;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "asin_cache.db";

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite primary result codes signalling a damaged file
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Files SQLite keeps next to the database in WAL mode
const SIDECAR_SUFFIXES: [&str; 3] = ["", "-wal", "-shm"];

const UPSERT: &str = "INSERT INTO asin_cache (fingerprint, asin, source, confidence, created_at, expires_at)
     VALUES (?, ?, ?, ?, ?, ?)
     ON CONFLICT(fingerprint) DO UPDATE SET
         asin = excluded.asin,
         source = excluded.source,
         confidence = excluded.confidence,
         created_at = excluded.created_at,
         expires_at = excluded.expires_at";

/// Cache store errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("integrity check failed: {0}")]
    Corrupt(String),

    #[error("legacy cache: {0}")]
    Legacy(String),
}

impl CacheError {
    /// True when the database file itself is damaged and must be replaced
    pub fn is_corruption(&self) -> bool {
        match self {
            CacheError::Database(e) => is_corrupt_database(e),
            CacheError::Migrate(MigrateError::Execute(e))
            | CacheError::Migrate(MigrateError::ExecuteMigration(e, _)) => is_corrupt_database(e),
            // Migration history that doesn't match ours
            CacheError::Migrate(
                MigrateError::VersionMissing(_)
                | MigrateError::VersionMismatch(_)
                | MigrateError::Dirty(_),
            ) => true,
            CacheError::Corrupt(_) => true,
            _ => false,
        }
    }
}

fn is_corrupt_database(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = e else {
        return false;
    };
    // Extended result codes carry the primary code in the low byte
    let primary = db
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code % 256);
    if matches!(primary, Some(SQLITE_CORRUPT | SQLITE_NOTADB)) {
        return true;
    }
    let message = db.message().to_ascii_lowercase();
    message.contains("not a database") || message.contains("malformed")
}

/// One cached resolution
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub asin: String,
    pub source: String,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// New entry created now, expiring after `ttl`
    pub fn new(
        fingerprint: impl Into<String>,
        asin: impl Into<String>,
        source: impl Into<String>,
        confidence: f32,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            fingerprint: fingerprint.into(),
            asin: asin.into(),
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

type EntryRow = (String, String, String, f64, i64, i64);

impl From<EntryRow> for CacheEntry {
    fn from(row: EntryRow) -> Self {
        let (fingerprint, asin, source, confidence, created_at, expires_at) = row;
        Self {
            fingerprint,
            asin,
            source,
            confidence: confidence as f32,
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_default(),
            expires_at: DateTime::from_timestamp_millis(expires_at).unwrap_or_default(),
        }
    }
}

/// Summary for `cache stats`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub total: u64,
    pub live: u64,
    pub expired: u64,
    /// Entry count per source name
    pub by_source: BTreeMap<String, u64>,
}

/// Pool plus a counter bumped on every reinitialization
struct Handle {
    generation: u64,
    pool: SqlitePool,
}

/// SQLite-backed fingerprint -> ASIN store
pub struct AsinCache {
    path: PathBuf,
    handle: RwLock<Handle>,
    reinit: tokio::sync::Mutex<()>,
    default_ttl: Duration,
}

impl AsinCache {
    /// Open (or create) the store at `path`, recovering from a corrupt file
    pub async fn open(path: impl Into<PathBuf>, default_ttl: Duration) -> Result<Self, CacheError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let pool = match connect(&path).await {
            Ok(pool) => pool,
            Err(e) if e.is_corruption() => {
                tracing::warn!(
                    "Cache at {} is unreadable ({}), starting fresh",
                    path.display(),
                    e
                );
                quarantine(&path)?;
                connect(&path).await?
            }
            Err(e) => return Err(e),
        };

        tracing::debug!("Opened ASIN cache at {}", path.display());

        Ok(Self {
            path,
            handle: RwLock::new(Handle {
                generation: 0,
                pool,
            }),
            reinit: tokio::sync::Mutex::new(()),
            default_ttl,
        })
    }

    /// Open the store and import a legacy JSON cache if one is present.
    /// A broken legacy file is logged and left in place.
    pub async fn open_with_legacy(
        path: impl Into<PathBuf>,
        legacy_path: &Path,
        default_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let cache = Self::open(path, default_ttl).await?;
        match legacy::migrate(&cache, legacy_path).await {
            Ok(0) => {}
            Ok(n) => tracing::info!("Imported {} legacy cache entries", n),
            Err(e) => tracing::warn!("Legacy cache import skipped: {}", e),
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Live entry for a fingerprint; expired entries are misses
    pub async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row: Option<EntryRow> = self
            .run(|pool| async move {
                sqlx::query_as(
                    "SELECT fingerprint, asin, source, confidence, created_at, expires_at
                     FROM asin_cache WHERE fingerprint = ?",
                )
                .bind(fingerprint)
                .fetch_optional(&pool)
                .await
            })
            .await?;

        Ok(row
            .map(CacheEntry::from)
            .filter(|entry| !entry.is_expired(Utc::now())))
    }

    /// Insert or overwrite an entry. `ttl` defaults to the store's TTL.
    pub async fn put(
        &self,
        fingerprint: &str,
        asin: &str,
        source: &str,
        confidence: f32,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(
            fingerprint,
            asin,
            source,
            confidence,
            ttl.unwrap_or(self.default_ttl),
        );
        self.put_many(std::slice::from_ref(&entry)).await
    }

    /// Upsert several entries in one transaction
    pub async fn put_many(&self, entries: &[CacheEntry]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }

        self.run(|pool| async move {
            let mut tx = pool.begin().await?;
            for entry in entries {
                sqlx::query(UPSERT)
                    .bind(&entry.fingerprint)
                    .bind(&entry.asin)
                    .bind(&entry.source)
                    .bind(f64::from(entry.confidence))
                    .bind(entry.created_at.timestamp_millis())
                    .bind(entry.expires_at.timestamp_millis())
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })
        .await
    }

    /// Delete one entry. Returns whether it existed.
    pub async fn remove(&self, fingerprint: &str) -> Result<bool, CacheError> {
        let affected = self
            .run(|pool| async move {
                sqlx::query("DELETE FROM asin_cache WHERE fingerprint = ?")
                    .bind(fingerprint)
                    .execute(&pool)
                    .await
                    .map(|r| r.rows_affected())
            })
            .await?;
        Ok(affected > 0)
    }

    /// Delete expired entries. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<u64, CacheError> {
        let now = Utc::now().timestamp_millis();
        self.run(|pool| async move {
            sqlx::query("DELETE FROM asin_cache WHERE expires_at <= ?")
                .bind(now)
                .execute(&pool)
                .await
                .map(|r| r.rows_affected())
        })
        .await
    }

    /// Delete everything. Returns how many entries were removed.
    pub async fn clear(&self) -> Result<u64, CacheError> {
        self.run(|pool| async move {
            sqlx::query("DELETE FROM asin_cache")
                .execute(&pool)
                .await
                .map(|r| r.rows_affected())
        })
        .await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = Utc::now().timestamp_millis();

        let (total, live): (i64, i64) = self
            .run(|pool| async move {
                sqlx::query_as(
                    "SELECT COUNT(*), COALESCE(SUM(CASE WHEN expires_at > ? THEN 1 ELSE 0 END), 0)
                     FROM asin_cache",
                )
                .bind(now)
                .fetch_one(&pool)
                .await
            })
            .await?;

        let by_source: Vec<(String, i64)> = self
            .run(|pool| async move {
                sqlx::query_as(
                    "SELECT source, COUNT(*) FROM asin_cache GROUP BY source ORDER BY source",
                )
                .fetch_all(&pool)
                .await
            })
            .await?;

        Ok(CacheStats {
            total: total as u64,
            live: live as u64,
            expired: (total - live).max(0) as u64,
            by_source: by_source
                .into_iter()
                .map(|(source, count)| (source, count as u64))
                .collect(),
        })
    }

    /// Run a query against the current pool. If it fails because the file is
    /// corrupt, reinitialize the store and run it once more.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, CacheError>
    where
        F: Fn(SqlitePool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let (generation, pool) = self.current();
        match op(pool).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = CacheError::Database(e);
                if !err.is_corruption() {
                    return Err(err);
                }
                self.reinitialize(generation, &err).await?;
                let (_, pool) = self.current();
                Ok(op(pool).await?)
            }
        }
    }

    fn current(&self) -> (u64, SqlitePool) {
        let handle = self.handle.read();
        (handle.generation, handle.pool.clone())
    }

    /// Replace a corrupt store with an empty one. Concurrent callers that saw
    /// the same failure reinitialize only once.
    async fn reinitialize(&self, failed_generation: u64, cause: &CacheError) -> Result<(), CacheError> {
        let _guard = self.reinit.lock().await;

        let (generation, pool) = self.current();
        if generation != failed_generation {
            return Ok(());
        }
        if integrity_check(&pool).await.is_ok() {
            return Ok(());
        }

        tracing::warn!(
            "Cache at {} became corrupt ({}), reinitializing",
            self.path.display(),
            cause
        );
        pool.close().await;
        quarantine(&self.path)?;
        let fresh = connect(&self.path).await?;

        *self.handle.write() = Handle {
            generation: generation + 1,
            pool: fresh,
        };
        Ok(())
    }
}

impl std::fmt::Debug for AsinCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsinCache")
            .field("path", &self.path)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

/// Connect, apply migrations and verify the file
async fn connect(path: &Path) -> Result<SqlitePool, CacheError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    let checked: Result<(), CacheError> = async {
        sqlx::migrate!("./migrations").run(&pool).await?;
        integrity_check(&pool).await
    }
    .await;

    match checked {
        Ok(()) => Ok(pool),
        Err(e) => {
            pool.close().await;
            Err(e)
        }
    }
}

async fn integrity_check(pool: &SqlitePool) -> Result<(), CacheError> {
    let (result,): (String,) = sqlx::query_as("PRAGMA quick_check")
        .fetch_one(pool)
        .await?;
    if result == "ok" {
        Ok(())
    } else {
        Err(CacheError::Corrupt(result))
    }
}

/// Move the database and its sidecar files out of the way
fn quarantine(path: &Path) -> Result<(), CacheError> {
    for suffix in SIDECAR_SUFFIXES {
        let mut file = OsString::from(path.as_os_str());
        file.push(suffix);
        let file = PathBuf::from(file);
        if !file.exists() {
            continue;
        }

        let mut target = file.clone().into_os_string();
        target.push(".corrupt");
        if let Err(e) = std::fs::rename(&file, &target) {
            tracing::warn!("Could not move {} aside ({}), deleting it", file.display(), e);
            std::fs::remove_file(&file)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_cache;

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _dir) = temp_cache().await;

        cache
            .put("mistborn|brandon sanderson", "B001QKBHG4", "marketplace-search", 0.95, None)
            .await
            .unwrap();

        let entry = cache.get("mistborn|brandon sanderson").await.unwrap().unwrap();
        assert_eq!(entry.asin, "B001QKBHG4");
        assert_eq!(entry.source, "marketplace-search");
        assert!((entry.confidence - 0.95).abs() < 1e-6);
        assert!(entry.expires_at > entry.created_at);
    }

    #[tokio::test]
    async fn test_missing_fingerprint() {
        let (cache, _dir) = temp_cache().await;
        assert!(cache.get("nothing|here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let (cache, _dir) = temp_cache().await;

        cache
            .put("old|book", "B000000001", "catalog-api", 0.9, Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(cache.get("old|book").await.unwrap().is_none());

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.expired, 1);

        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_sub_second_ttl() {
        let (cache, _dir) = temp_cache().await;

        cache
            .put("short|lived", "B000000001", "catalog-api", 0.9, Some(Duration::from_millis(300)))
            .await
            .unwrap();
        assert!(cache.get("short|lived").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(cache.get("short|lived").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (cache, _dir) = temp_cache().await;

        cache.put("fp", "B000000001", "catalog-api", 0.8, None).await.unwrap();
        cache.put("fp", "B000000002", "bibliographic-api", 0.9, None).await.unwrap();

        let entry = cache.get("fp").await.unwrap().unwrap();
        assert_eq!(entry.asin, "B000000002");
        assert_eq!(cache.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let (cache, _dir) = temp_cache().await;

        cache.put("a", "B000000001", "catalog-api", 1.0, None).await.unwrap();
        cache.put("b", "B000000002", "catalog-api", 1.0, None).await.unwrap();

        assert!(cache.remove("a").await.unwrap());
        assert!(!cache.remove("a").await.unwrap());
        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(cache.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_by_source() {
        let (cache, _dir) = temp_cache().await;

        let ttl = Duration::from_secs(3600);
        cache
            .put_many(&[
                CacheEntry::new("a", "B000000001", "catalog-api", 1.0, ttl),
                CacheEntry::new("b", "B000000002", "catalog-api", 1.0, ttl),
                CacheEntry::new("c", "B000000003", "legacy", 1.0, ttl),
            ])
            .await
            .unwrap();

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.live, 3);
        assert_eq!(stats.by_source.get("catalog-api"), Some(&2));
        assert_eq!(stats.by_source.get("legacy"), Some(&1));
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_DB_NAME);

        {
            let cache = AsinCache::open(&path, Duration::from_secs(3600)).await.unwrap();
            cache.put("fp", "B001QKBHG4", "catalog-api", 1.0, None).await.unwrap();
        }

        let cache = AsinCache::open(&path, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(cache.get("fp").await.unwrap().unwrap().asin, "B001QKBHG4");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_DB_NAME);
        std::fs::write(&path, b"not a sqlite database ".repeat(200)).unwrap();

        let cache = AsinCache::open(&path, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(cache.stats().await.unwrap().total, 0);

        cache.put("fp", "B001QKBHG4", "catalog-api", 1.0, None).await.unwrap();
        assert_eq!(cache.get("fp").await.unwrap().unwrap().asin, "B001QKBHG4");

        assert!(dir.path().join("asin_cache.db.corrupt").exists());
    }

    #[tokio::test]
    async fn test_corruption_during_session_is_recovered() {
        let (cache, dir) = temp_cache().await;
        cache.put("fp", "B001QKBHG4", "catalog-api", 1.0, None).await.unwrap();

        // Close every connection, damage the file, and point the store at it
        // through a pool that only connects on first use
        let (_, pool) = cache.current();
        pool.close().await;
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = cache.path().as_os_str().to_owned();
            sidecar.push(suffix);
            let _ = std::fs::remove_file(PathBuf::from(sidecar));
        }
        std::fs::write(cache.path(), b"not a sqlite database ".repeat(200)).unwrap();
        let options = SqliteConnectOptions::new().filename(cache.path());
        cache.handle.write().pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(options);

        cache.put("fp2", "B000OCXGPY", "marketplace-search", 0.95, None).await.unwrap();

        assert_eq!(cache.get("fp2").await.unwrap().unwrap().asin, "B000OCXGPY");
        assert!(cache.get("fp").await.unwrap().is_none());
        assert_eq!(cache.current().0, 1);
        assert!(dir.path().join("asin_cache.db.corrupt").exists());
    }

    #[tokio::test]
    async fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join(DEFAULT_DB_NAME);

        let cache = AsinCache::open(&path, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.path(), path.as_path());
        assert!(path.exists());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new("fp", "B001QKBHG4", "cache", 1.0, Duration::from_secs(60));
        assert!(!entry.is_expired(Utc::now()));
        assert!(entry.is_expired(entry.expires_at));

        let forever = CacheEntry::new("fp", "B001QKBHG4", "cache", 1.0, Duration::MAX);
        assert_eq!(forever.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_corruption_classification() {
        assert!(CacheError::Corrupt("page 3 malformed".into()).is_corruption());
        assert!(!CacheError::Legacy("bad json".into()).is_corruption());
        assert!(!CacheError::Database(sqlx::Error::RowNotFound).is_corruption());
        assert!(CacheError::Migrate(MigrateError::VersionMissing(1)).is_corruption());
    }
}
