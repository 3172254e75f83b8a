//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Logical partition inside the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
  /// Raw backend incident records, keyed by backend id
  Incidents,
  /// Crime-type reference data
  CrimeTypes,
  /// Generic keyed cache
  Cache,
}

impl Store {
  pub const ALL: [Store; 3] = [Store::Incidents, Store::CrimeTypes, Store::Cache];

  pub fn name(self) -> &'static str {
    match self {
      Store::Incidents => "incidents",
      Store::CrimeTypes => "crime_types",
      Store::Cache => "cache",
    }
  }
}

impl fmt::Display for Store {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Trait for entities that can be cached.
///
/// Implementors provide the store they live in and a key unique within it.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Unique identifier for this entity inside its store; empty when the
  /// entity has none and must not be cached
  fn cache_key(&self) -> String;

  /// Store this entity type is kept in
  fn store() -> Store;
}

/// A cached value together with its write time and expiry, both in
/// milliseconds since the Unix epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub value: T,
  pub timestamp: i64,
  pub expires_at: i64,
}

impl<T> CacheEntry<T> {
  pub fn new(value: T, now_ms: i64, ttl_ms: i64) -> Self {
    Self {
      value,
      timestamp: now_ms,
      expires_at: now_ms.saturating_add(ttl_ms),
    }
  }

  pub fn is_expired(&self, now_ms: i64) -> bool {
    now_ms > self.expires_at
  }
}

/// Result from a cache-through read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the backend
  Network,
  /// Served from the local cache
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_expiry_is_strictly_after_deadline() {
    let entry = CacheEntry::new("v", 1_000, 500);
    assert_eq!(entry.expires_at, 1_500);
    assert!(!entry.is_expired(1_500));
    assert!(entry.is_expired(1_501));
  }

  #[test]
  fn test_store_names_are_distinct() {
    let names: std::collections::HashSet<_> = Store::ALL.iter().map(|s| s.name()).collect();
    assert_eq!(names.len(), 3);
  }
}
