//! Cache layer that orchestrates caching logic with network fetching.
//!
//! The local cache is never a hard dependency: any storage failure is logged
//! and the layer falls through to the fetcher.

use std::future::Future;
use tracing::{debug, warn};

use super::storage::LocalCache;
use super::traits::{CacheResult, Cacheable};

/// Read-through / write-through layer in front of a remote fetcher.
#[derive(Clone)]
pub struct CacheLayer {
  storage: LocalCache,
}

impl CacheLayer {
  pub fn new(storage: LocalCache) -> Self {
    Self { storage }
  }

  pub fn storage(&self) -> &LocalCache {
    &self.storage
  }

  /// Fetch a single entity with cache-first strategy.
  ///
  /// 1. Check cache - on hit, return it without calling `fetcher`
  /// 2. On miss (or cache failure), fetch from network
  /// 3. Write the fetched entity through to the cache
  pub async fn fetch_one<T, E, F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<T>, E>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    match self.storage.get::<T>(T::store(), key).await {
      Ok(Some(cached)) => {
        debug!(store = %T::store(), key, "cache hit");
        return Ok(CacheResult::from_cache(cached));
      }
      Ok(None) => {}
      Err(e) => warn!(store = %T::store(), key, error = %e, "cache read failed, fetching remote"),
    }

    let data = fetcher().await?;
    self.write_through(std::slice::from_ref(&data)).await;
    Ok(CacheResult::from_network(data))
  }

  /// Return every cached entity of `T`, or fetch the full set when the
  /// cache holds none.
  ///
  /// A non-empty scan wins even if it is partial; the remote bulk fetch is
  /// only a cold-start fallback.
  pub async fn scan_or_fetch<T, E, F, Fut>(&self, fetcher: F) -> Result<CacheResult<Vec<T>>, E>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
  {
    match self.storage.get_all::<T>(T::store()).await {
      Ok(cached) if !cached.is_empty() => return Ok(CacheResult::from_cache(cached)),
      Ok(_) => {}
      Err(e) => warn!(store = %T::store(), error = %e, "cache scan failed, fetching remote"),
    }

    let data = fetcher().await?;
    self.write_through(&data).await;
    Ok(CacheResult::from_network(data))
  }

  /// Best-effort write of entities into the cache. Entities without a key
  /// are skipped.
  pub async fn write_through<T: Cacheable>(&self, entities: &[T]) {
    for entity in entities {
      let key = entity.cache_key();
      if key.is_empty() {
        debug!(store = %T::store(), "entity has no cache key, not caching it");
        continue;
      }
      if let Err(e) = self.storage.put(entity).await {
        warn!(store = %T::store(), key = %key, error = %e, "cache write failed");
        // storage is likely unavailable; skip the rest
        return;
      }
    }
  }

  /// Best-effort removal of one entity from the cache.
  pub async fn evict<T: Cacheable>(&self, key: &str) {
    if let Err(e) = self.storage.delete(T::store(), key).await {
      warn!(store = %T::store(), key, error = %e, "cache delete failed");
    }
  }
}
