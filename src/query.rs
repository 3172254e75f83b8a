//! Async query cache with staleness, retry and de-duplication.
//!
//! Inspired by TanStack Query, [`QueryClient`] keeps the last result of every
//! query key in memory:
//!
//! - fresh results are returned without fetching
//! - stale (or invalidated) results are returned immediately while a
//!   background refetch replaces them
//! - concurrent fetches of the same key share one in-flight request
//! - failed fetches are retried with capped exponential backoff
//!
//! # Example
//!
//! ```ignore
//! let api = api.clone();
//! let page = queries
//!   .fetch(&IncidentQueryKey::List(params.clone()), move || {
//!     let api = api.clone();
//!     let params = params.clone();
//!     async move { api.list_incidents(&params).await.map_err(Into::into) }
//!   })
//!   .await?;
//! ```

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::api::ApiError;

/// Identifies a query result. Keys are kept with their results so
/// bulk updates can inspect them.
pub trait QueryKey: Clone + Send + Sync + 'static {
  /// Stable identifier for the cached result
  fn cache_hash(&self) -> String;

  /// Human-readable description for logs
  fn description(&self) -> String;

  /// Entity kind the result belongs to; invalidation works per kind
  fn entity(&self) -> &'static str;
}

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is fetching and has no data yet
  Loading,
  /// Query has data (possibly stale and being refreshed)
  Success(T),
  /// Query failed and has no data
  Error(String),
}

/// Staleness and retry policy
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
  /// How long a result stays fresh
  pub stale_time: Duration,
  /// Retries after the first failed attempt
  pub retries: u32,
  /// Delay before the first retry; doubles per attempt
  pub retry_base: Duration,
  /// Upper bound for the retry delay
  pub retry_cap: Duration,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(5 * 60),
      retries: 2,
      retry_base: Duration::from_secs(1),
      retry_cap: Duration::from_secs(5),
    }
  }
}

impl QueryOptions {
  /// Delay before retry number `attempt + 1`.
  pub fn retry_delay(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    self.retry_base.saturating_mul(factor).min(self.retry_cap)
  }
}

type AnyData = Arc<dyn Any + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, std::result::Result<AnyData, String>>>;

struct Entry {
  key: Box<dyn Any + Send + Sync>,
  entity: &'static str,
  description: String,
  data: Option<AnyData>,
  updated_at: Option<Instant>,
  invalidated: bool,
  error: Option<String>,
  in_flight: Option<SharedFetch>,
  /// Bumped whenever a fetch starts or the entry is invalidated; a fetch
  /// only commits its result if the generation is unchanged.
  generation: u64,
}

impl Entry {
  fn new<K: QueryKey>(key: &K) -> Self {
    Self {
      key: Box::new(key.clone()),
      entity: key.entity(),
      description: key.description(),
      data: None,
      updated_at: None,
      invalidated: false,
      error: None,
      in_flight: None,
      generation: 0,
    }
  }

  fn is_fresh(&self, stale_time: Duration) -> bool {
    !self.invalidated
      && self
        .updated_at
        .is_some_and(|at| at.elapsed() <= stale_time)
  }

  fn key<K: QueryKey>(&self) -> Option<&K> {
    self.key.downcast_ref::<K>()
  }

  fn mark_stale(&mut self) {
    self.invalidated = true;
    self.in_flight = None;
    self.generation = self.generation.wrapping_add(1);
  }

  fn commit(&mut self, data: AnyData) {
    self.data = Some(data);
    self.updated_at = Some(Instant::now());
    self.invalidated = false;
    self.error = None;
  }
}

/// Shared in-memory cache of query results.
#[derive(Clone)]
pub struct QueryClient {
  entries: Arc<Mutex<HashMap<String, Entry>>>,
  options: QueryOptions,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new(QueryOptions::default())
  }
}

impl QueryClient {
  pub fn new(options: QueryOptions) -> Self {
    Self {
      entries: Arc::new(Mutex::new(HashMap::new())),
      options,
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
    lock_entries(&self.entries)
  }

  /// Get the result for `key`, fetching it if needed.
  ///
  /// Fresh data returns immediately. Stale data also returns immediately,
  /// with a refetch started in the background. Without data the call waits
  /// for the (possibly shared) fetch, retries included.
  pub async fn fetch<T, K, F, Fut>(&self, key: &K, fetcher: F) -> Result<Arc<T>>
  where
    T: Send + Sync + 'static,
    K: QueryKey,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let hash = key.cache_hash();

    let (cached, pending) = {
      let mut entries = self.lock();
      let entry = entries
        .entry(hash.clone())
        .or_insert_with(|| Entry::new(key));

      match entry.data.clone() {
        Some(data) if entry.is_fresh(self.options.stale_time) => {
          return downcast(data, &entry.description);
        }
        cached => (cached, self.start_fetch(entry, hash, fetcher)),
      }
    };

    match cached {
      Some(data) => {
        debug!(query = %key.description(), "serving stale data, revalidating");
        tokio::spawn(pending);
        downcast(data, &key.description())
      }
      None => {
        let data = pending.await.map_err(|e| eyre!(e))?;
        downcast(data, &key.description())
      }
    }
  }

  /// Join the entry's in-flight fetch or start a new one.
  fn start_fetch<T, F, Fut>(&self, entry: &mut Entry, hash: String, fetcher: F) -> SharedFetch
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    if let Some(pending) = &entry.in_flight {
      return pending.clone();
    }

    entry.generation = entry.generation.wrapping_add(1);
    let generation = entry.generation;
    let description = entry.description.clone();
    let entries = Arc::clone(&self.entries);
    let options = self.options;

    let pending = async move {
      let result = retry_with_backoff(&options, &description, fetcher)
        .await
        .map(|data| Arc::new(data) as AnyData)
        .map_err(|e| format!("{:#}", e));

      let mut entries = lock_entries(&entries);
      if let Some(entry) = entries.get_mut(&hash) {
        if entry.generation == generation {
          entry.in_flight = None;
          match &result {
            Ok(data) => entry.commit(Arc::clone(data)),
            Err(e) => entry.error = Some(e.clone()),
          }
        }
      }
      result
    }
    .boxed()
    .shared();

    entry.in_flight = Some(pending.clone());
    pending
  }

  /// Current data for `key`, fresh or not.
  #[cfg(test)]
  pub fn get_data<T: Send + Sync + 'static>(&self, key: &impl QueryKey) -> Option<Arc<T>> {
    let entries = self.lock();
    let data = entries.get(&key.cache_hash())?.data.clone()?;
    data.downcast::<T>().ok()
  }

  pub fn state<T: Send + Sync + 'static>(&self, key: &impl QueryKey) -> QueryState<Arc<T>> {
    let entries = self.lock();
    let Some(entry) = entries.get(&key.cache_hash()) else {
      return QueryState::Idle;
    };

    if let Some(data) = entry.data.clone().and_then(|d| d.downcast::<T>().ok()) {
      return QueryState::Success(data);
    }
    match (&entry.in_flight, &entry.error) {
      (Some(_), _) => QueryState::Loading,
      (None, Some(e)) => QueryState::Error(e.clone()),
      (None, None) => QueryState::Idle,
    }
  }

  /// Whether `key` has data that would be refetched on the next read.
  #[cfg(test)]
  pub fn is_stale(&self, key: &impl QueryKey) -> bool {
    let entries = self.lock();
    entries
      .get(&key.cache_hash())
      .is_some_and(|e| e.data.is_some() && !e.is_fresh(self.options.stale_time))
  }

  /// Replace the data for `key` with what `updater` returns. Returning
  /// `None` leaves the entry untouched.
  pub fn set_data<T, K>(&self, key: &K, updater: impl FnOnce(Option<&T>) -> Option<T>)
  where
    T: Send + Sync + 'static,
    K: QueryKey,
  {
    let mut entries = self.lock();
    let current = entries
      .get(&key.cache_hash())
      .and_then(|e| e.data.clone())
      .and_then(|d| d.downcast::<T>().ok());

    if let Some(next) = updater(current.as_deref()) {
      entries
        .entry(key.cache_hash())
        .or_insert_with(|| Entry::new(key))
        .commit(Arc::new(next));
    }
  }

  /// Apply `updater` to every result of `entity` keyed by a `K` and holding
  /// a `T`. Returns how many results were replaced.
  pub fn update_where<K, T>(
    &self,
    entity: &str,
    mut updater: impl FnMut(&K, &T) -> Option<T>,
  ) -> usize
  where
    K: QueryKey,
    T: Send + Sync + 'static,
  {
    let mut entries = self.lock();
    let mut updated = 0;
    for entry in entries.values_mut().filter(|e| e.entity == entity) {
      let Some(current) = entry.data.clone().and_then(|d| d.downcast::<T>().ok()) else {
        continue;
      };
      let Some(next) = entry.key::<K>().and_then(|key| updater(key, &current)) else {
        continue;
      };
      entry.data = Some(Arc::new(next));
      updated += 1;
    }
    updated
  }

  /// Whether any result of `entity` keyed by a `K` and holding a `T`
  /// satisfies `predicate`.
  pub fn any<K, T>(&self, entity: &str, predicate: impl Fn(&K, &T) -> bool) -> bool
  where
    K: QueryKey,
    T: Send + Sync + 'static,
  {
    let entries = self.lock();
    entries
      .values()
      .filter(|e| e.entity == entity)
      .filter_map(|e| Some((e.key::<K>()?, e.data.clone()?.downcast::<T>().ok()?)))
      .any(|(key, data)| predicate(key, &data))
  }

  /// Mark every result of `entity` stale so the next read refetches.
  /// In-flight fetches still resolve for their callers but no longer commit.
  pub fn invalidate(&self, entity: &str) -> usize {
    let mut entries = self.lock();
    let mut count = 0;
    for entry in entries.values_mut().filter(|e| e.entity == entity) {
      entry.mark_stale();
      count += 1;
    }
    debug!(entity, count, "invalidated queries");
    count
  }

  /// Mark stale the results of `entity` whose key satisfies `predicate`.
  pub fn invalidate_where<K: QueryKey>(&self, entity: &str, predicate: impl Fn(&K) -> bool) -> usize {
    let mut entries = self.lock();
    let mut count = 0;
    for entry in entries.values_mut().filter(|e| e.entity == entity) {
      if entry.key::<K>().is_some_and(&predicate) {
        entry.mark_stale();
        count += 1;
      }
    }
    count
  }

  /// Mark a single result stale.
  pub fn invalidate_key(&self, key: &impl QueryKey) {
    if let Some(entry) = self.lock().get_mut(&key.cache_hash()) {
      entry.mark_stale();
    }
  }

  /// Forget a result entirely.
  pub fn remove(&self, key: &impl QueryKey) {
    self.lock().remove(&key.cache_hash());
  }
}

fn lock_entries(
  entries: &Mutex<HashMap<String, Entry>>,
) -> MutexGuard<'_, HashMap<String, Entry>> {
  entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn downcast<T: Send + Sync + 'static>(data: AnyData, description: &str) -> Result<Arc<T>> {
  data
    .downcast::<T>()
    .map_err(|_| eyre!("Query '{}' holds data of a different type", description))
}

/// API errors that cannot succeed on retry (4xx, bad bodies) fail fast;
/// everything else is retried.
fn is_retryable(e: &color_eyre::Report) -> bool {
  e.downcast_ref::<ApiError>().map_or(true, ApiError::is_transient)
}

/// Run `fetcher`, retrying failures with capped exponential backoff.
async fn retry_with_backoff<T, F, Fut>(
  options: &QueryOptions,
  description: &str,
  fetcher: F,
) -> Result<T>
where
  F: Fn() -> Fut,
  Fut: Future<Output = Result<T>>,
{
  let mut attempt = 0;
  loop {
    match fetcher().await {
      Ok(data) => return Ok(data),
      Err(e) if attempt < options.retries && is_retryable(&e) => {
        let delay = options.retry_delay(attempt);
        attempt += 1;
        warn!(
          query = description,
          attempt,
          retries = options.retries,
          ?delay,
          error = %e,
          "query failed, retrying"
        );
        tokio::time::sleep(delay).await;
      }
      Err(e) => {
        warn!(query = description, error = %e, "query failed");
        return Err(e);
      }
    }
  }
}
