//! SQLite-backed persistent local cache with per-entry TTL.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::traits::{CacheEntry, Cacheable, Store};

/// Default time-to-live for cache entries (10 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to create cache directory {path}: {source}")]
  Directory {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to open cache database at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("cache query failed: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to serialize cache value: {0}")]
  Serialize(#[from] serde_json::Error),

  #[error("cache lock poisoned")]
  Poisoned,
}

#[derive(Debug)]
enum Location {
  File(PathBuf),
  Memory,
}

struct Inner {
  location: Location,
  conn: OnceCell<Mutex<Connection>>,
}

/// Persistent key/value cache partitioned into [`Store`]s.
///
/// The database is opened lazily by the first operation (or an explicit
/// [`LocalCache::init`]); concurrent first callers share one open. Clones
/// share the same handle.
#[derive(Clone)]
pub struct LocalCache {
  inner: Arc<Inner>,
  default_ttl: Duration,
}

/// Schema for the cache table. One row per (store, key).
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (store, key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expiry
    ON cache_entries(store, expires_at);
"#;

impl LocalCache {
  /// Cache backed by a database file. Nothing is touched until first use.
  pub fn open(path: impl Into<PathBuf>) -> Self {
    Self::with_location(Location::File(path.into()))
  }

  /// Cache backed by an in-memory database.
  pub fn in_memory() -> Self {
    Self::with_location(Location::Memory)
  }

  fn with_location(location: Location) -> Self {
    Self {
      inner: Arc::new(Inner {
        location,
        conn: OnceCell::new(),
      }),
      default_ttl: DEFAULT_TTL,
    }
  }

  /// Set the TTL used by [`LocalCache::put`].
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Get the default database path.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("vigia").join("cache.db"))
  }

  /// Open the database and create the schema if needed. Idempotent.
  pub async fn init(&self) -> Result<(), CacheError> {
    self.connection().await.map(|_| ())
  }

  async fn connection(&self) -> Result<&Mutex<Connection>, CacheError> {
    self
      .inner
      .conn
      .get_or_try_init(|| async { open_connection(&self.inner.location).map(Mutex::new) })
      .await
  }

  async fn with_conn<R, F>(&self, f: F) -> Result<R, CacheError>
  where
    F: FnOnce(&Connection) -> Result<R, CacheError>,
  {
    let conn = self.connection().await?;
    let guard = conn.lock().map_err(|_| CacheError::Poisoned)?;
    f(&guard)
  }

  /// Insert or overwrite `key` in `store`.
  pub async fn set<T: Serialize>(
    &self,
    store: Store,
    key: &str,
    value: &T,
    ttl: Duration,
  ) -> Result<(), CacheError> {
    let ttl_ms = ttl.as_millis().min(i64::MAX as u128) as i64;
    let entry = CacheEntry::new(serde_json::to_string(value)?, now_ms(), ttl_ms);

    self
      .with_conn(|conn| {
        conn.execute(
          "INSERT OR REPLACE INTO cache_entries (store, key, value, timestamp, expires_at)
           VALUES (?, ?, ?, ?, ?)",
          params![store.name(), key, entry.value, entry.timestamp, entry.expires_at],
        )?;
        Ok(())
      })
      .await
  }

  /// Store a [`Cacheable`] entity under its own key with the default TTL.
  pub async fn put<T: Cacheable>(&self, entity: &T) -> Result<(), CacheError> {
    self
      .set(T::store(), &entity.cache_key(), entity, self.default_ttl)
      .await
  }

  /// Read an entry with its metadata. Expired entries are deleted and
  /// reported as absent.
  pub async fn get_entry<T: DeserializeOwned>(
    &self,
    store: Store,
    key: &str,
  ) -> Result<Option<CacheEntry<T>>, CacheError> {
    let now = now_ms();

    self
      .with_conn(|conn| {
        let row: Option<(String, i64, i64)> = conn
          .query_row(
            "SELECT value, timestamp, expires_at FROM cache_entries
             WHERE store = ? AND key = ?",
            params![store.name(), key],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
          )
          .optional()?;

        let Some((value, timestamp, expires_at)) = row else {
          return Ok(None);
        };
        let raw = CacheEntry {
          value,
          timestamp,
          expires_at,
        };

        let drop_entry = |conn: &Connection| {
          conn.execute(
            "DELETE FROM cache_entries WHERE store = ? AND key = ?",
            params![store.name(), key],
          )
        };

        if raw.is_expired(now) {
          debug!(%store, key, "evicting expired cache entry");
          drop_entry(conn)?;
          return Ok(None);
        }

        match serde_json::from_str(&raw.value) {
          Ok(value) => Ok(Some(CacheEntry {
            value,
            timestamp: raw.timestamp,
            expires_at: raw.expires_at,
          })),
          Err(e) => {
            warn!(%store, key, error = %e, "dropping undecodable cache entry");
            drop_entry(conn)?;
            Ok(None)
          }
        }
      })
      .await
  }

  /// Read a value if present and unexpired.
  pub async fn get<T: DeserializeOwned>(
    &self,
    store: Store,
    key: &str,
  ) -> Result<Option<T>, CacheError> {
    Ok(self.get_entry(store, key).await?.map(|e| e.value))
  }

  /// All unexpired values in `store`.
  ///
  /// Unlike [`LocalCache::get`] this does not delete expired rows it skips;
  /// they linger until read individually or the store is cleared.
  pub async fn get_all<T: DeserializeOwned>(&self, store: Store) -> Result<Vec<T>, CacheError> {
    let now = now_ms();

    self
      .with_conn(|conn| {
        let mut stmt = conn.prepare(
          "SELECT value FROM cache_entries
           WHERE store = ? AND expires_at >= ?
           ORDER BY timestamp DESC",
        )?;

        let values = stmt
          .query_map(params![store.name(), now], |row| row.get::<_, String>(0))?
          .filter_map(|r| r.ok())
          .filter_map(|data| serde_json::from_str(&data).ok())
          .collect();

        Ok(values)
      })
      .await
  }

  pub async fn delete(&self, store: Store, key: &str) -> Result<(), CacheError> {
    self
      .with_conn(|conn| {
        conn.execute(
          "DELETE FROM cache_entries WHERE store = ? AND key = ?",
          params![store.name(), key],
        )?;
        Ok(())
      })
      .await
  }

  pub async fn clear(&self, store: Store) -> Result<(), CacheError> {
    self
      .with_conn(|conn| {
        conn.execute(
          "DELETE FROM cache_entries WHERE store = ?",
          params![store.name()],
        )?;
        Ok(())
      })
      .await
  }
}

fn open_connection(location: &Location) -> Result<Connection, CacheError> {
  let conn = match location {
    Location::Memory => Connection::open_in_memory().map_err(|source| CacheError::Open {
      path: ":memory:".to_string(),
      source,
    })?,
    Location::File(path) => open_file(path)?,
  };

  conn.execute_batch(CACHE_SCHEMA)?;
  debug!(?location, "local cache opened");
  Ok(conn)
}

fn open_file(path: &Path) -> Result<Connection, CacheError> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).map_err(|source| CacheError::Directory {
      path: parent.display().to_string(),
      source,
    })?;
  }

  Connection::open(path).map_err(|source| CacheError::Open {
    path: path.display().to_string(),
    source,
  })
}

fn now_ms() -> i64 {
  Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn row_count(cache: &LocalCache, store: Store) -> i64 {
    cache
      .with_conn(|conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
          params![store.name()],
          |row| row.get(0),
        )?)
      })
      .await
      .unwrap()
  }

  #[tokio::test]
  async fn test_set_then_get_round_trips() {
    let cache = LocalCache::in_memory();
    cache
      .set(Store::Cache, "answer", &42u32, DEFAULT_TTL)
      .await
      .unwrap();

    let value: Option<u32> = cache.get(Store::Cache, "answer").await.unwrap();
    assert_eq!(value, Some(42));
  }

  #[tokio::test]
  async fn test_set_overwrites_existing_key() {
    let cache = LocalCache::in_memory();
    cache.set(Store::Cache, "k", &"old", DEFAULT_TTL).await.unwrap();
    cache.set(Store::Cache, "k", &"new", DEFAULT_TTL).await.unwrap();

    let value: Option<String> = cache.get(Store::Cache, "k").await.unwrap();
    assert_eq!(value.as_deref(), Some("new"));
    assert_eq!(row_count(&cache, Store::Cache).await, 1);
  }

  #[tokio::test]
  async fn test_stores_are_isolated() {
    let cache = LocalCache::in_memory();
    cache.set(Store::Incidents, "1", &"incident", DEFAULT_TTL).await.unwrap();

    let other: Option<String> = cache.get(Store::Cache, "1").await.unwrap();
    assert!(other.is_none());
    assert_eq!(cache.get_all::<String>(Store::CrimeTypes).await.unwrap().len(), 0);
  }

  #[tokio::test]
  async fn test_expired_get_evicts_but_get_all_only_skips() {
    let cache = LocalCache::in_memory();
    cache
      .set(Store::Incidents, "1", &"short", Duration::from_millis(1))
      .await
      .unwrap();
    cache
      .set(Store::Incidents, "2", &"long", DEFAULT_TTL)
      .await
      .unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let all: Vec<String> = cache.get_all(Store::Incidents).await.unwrap();
    assert_eq!(all, vec!["long".to_string()]);
    // get_all leaves the expired row in place
    assert_eq!(row_count(&cache, Store::Incidents).await, 2);

    let expired: Option<String> = cache.get(Store::Incidents, "1").await.unwrap();
    assert!(expired.is_none());
    assert_eq!(row_count(&cache, Store::Incidents).await, 1);
  }

  #[tokio::test]
  async fn test_entry_metadata_tracks_ttl() {
    let cache = LocalCache::in_memory();
    cache
      .set(Store::Cache, "k", &1u8, Duration::from_secs(60))
      .await
      .unwrap();

    let entry = cache.get_entry::<u8>(Store::Cache, "k").await.unwrap().unwrap();
    assert_eq!(entry.expires_at - entry.timestamp, 60_000);
  }

  #[tokio::test]
  async fn test_delete_and_clear() {
    let cache = LocalCache::in_memory();
    for key in ["a", "b", "c"] {
      cache.set(Store::Cache, key, &key, DEFAULT_TTL).await.unwrap();
    }
    cache.set(Store::Incidents, "x", &"x", DEFAULT_TTL).await.unwrap();

    cache.delete(Store::Cache, "a").await.unwrap();
    assert!(cache.get::<String>(Store::Cache, "a").await.unwrap().is_none());
    assert_eq!(row_count(&cache, Store::Cache).await, 2);

    cache.clear(Store::Cache).await.unwrap();
    assert_eq!(row_count(&cache, Store::Cache).await, 0);
    assert_eq!(row_count(&cache, Store::Incidents).await, 1);
  }

  #[tokio::test]
  async fn test_concurrent_init_shares_one_handle() {
    let dir = tempfile::tempdir().unwrap();
    let cache = LocalCache::open(dir.path().join("nested").join("cache.db"));

    let (a, b) = tokio::join!(cache.connection(), cache.connection());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(std::ptr::eq(a, b));

    cache.init().await.unwrap();
    assert!(std::ptr::eq(cache.connection().await.unwrap(), a));
  }

  #[tokio::test]
  async fn test_unavailable_storage_rejects_operations() {
    let cache = LocalCache::open("/dev/null/vigia/cache.db");

    assert!(cache.init().await.is_err());
    assert!(cache.set(Store::Cache, "k", &1, DEFAULT_TTL).await.is_err());
    assert!(cache.get::<i32>(Store::Cache, "k").await.is_err());
  }

  #[tokio::test]
  async fn test_undecodable_entry_reads_as_absent() {
    let cache = LocalCache::in_memory();
    cache.set(Store::Cache, "k", &"text", DEFAULT_TTL).await.unwrap();

    let value: Option<u64> = cache.get(Store::Cache, "k").await.unwrap();
    assert!(value.is_none());
    assert_eq!(row_count(&cache, Store::Cache).await, 0);
  }
}
