//! Reference data: crime types (from the API) and neighborhoods (from config).

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::api_types::ApiTipoCrime;
use super::client::{CrimeTypeFilter, IncidentApi};
use super::error::ApiError;
use super::types::{CrimeType, Neighborhood};
use crate::cache::{LocalCache, Store};

/// Key of the crime-type snapshot inside [`Store::CrimeTypes`].
const CATALOG_KEY: &str = "all";

/// Lookups the mapper needs to turn backend codes into labels.
pub trait ReferenceLookup {
  fn crime_type_name(&self, code: i64) -> Option<&str>;

  fn neighborhood(&self, code: i64) -> Option<&Neighborhood>;
}

/// In-memory reference tables
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
  crime_types: HashMap<i64, String>,
  neighborhoods: HashMap<i64, Neighborhood>,
}

impl ReferenceTables {
  pub fn new(crime_types: &[CrimeType], neighborhoods: &[Neighborhood]) -> Self {
    Self {
      crime_types: crime_types
        .iter()
        .map(|t| (t.id, t.name.clone()))
        .collect(),
      neighborhoods: neighborhoods.iter().map(|n| (n.id, n.clone())).collect(),
    }
  }
}

impl ReferenceLookup for ReferenceTables {
  fn crime_type_name(&self, code: i64) -> Option<&str> {
    self.crime_types.get(&code).map(String::as_str)
  }

  fn neighborhood(&self, code: i64) -> Option<&Neighborhood> {
    self.neighborhoods.get(&code)
  }
}

impl From<ApiTipoCrime> for CrimeType {
  fn from(t: ApiTipoCrime) -> Self {
    CrimeType {
      id: t.id_tipo_crime,
      name: t.nome_tipo_crime,
      category: t.categoria,
      active: t.ativo,
    }
  }
}

type CatalogResult = Result<Arc<Vec<CrimeType>>, Arc<ApiError>>;
type CatalogFuture = Shared<BoxFuture<'static, CatalogResult>>;

struct CatalogInner {
  api: Arc<dyn IncidentApi>,
  cache: LocalCache,
  loaded: Mutex<Option<Arc<Vec<CrimeType>>>>,
  in_flight: Mutex<Option<CatalogFuture>>,
}

/// Crime-type table with request coalescing.
///
/// The first caller starts a load (local cache, then API); callers arriving
/// while it runs await the same future instead of issuing their own request.
#[derive(Clone)]
pub struct CrimeTypeCatalog {
  inner: Arc<CatalogInner>,
}

impl CrimeTypeCatalog {
  pub fn new(api: Arc<dyn IncidentApi>, cache: LocalCache) -> Self {
    Self {
      inner: Arc::new(CatalogInner {
        api,
        cache,
        loaded: Mutex::new(None),
        in_flight: Mutex::new(None),
      }),
    }
  }

  /// Get the crime-type table, loading it if needed.
  pub async fn load(&self) -> CatalogResult {
    if let Some(loaded) = lock(&self.inner.loaded).clone() {
      return Ok(loaded);
    }

    let future = {
      let mut slot = lock(&self.inner.in_flight);
      match slot.as_ref() {
        Some(pending) => pending.clone(),
        None => {
          let inner = Arc::clone(&self.inner);
          let pending = async move { fetch_catalog(&inner).await.map_err(Arc::new) }
            .boxed()
            .shared();
          *slot = Some(pending.clone());
          pending
        }
      }
    };

    let result = future.clone().await;

    {
      let mut slot = lock(&self.inner.in_flight);
      if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&future)) {
        *slot = None;
      }
    }
    if let Ok(types) = &result {
      *lock(&self.inner.loaded) = Some(Arc::clone(types));
    }

    result
  }

  /// Reference tables for the mapper. A failed load yields an empty crime
  /// table so mapping falls back to placeholder labels.
  pub async fn tables(&self, neighborhoods: &[Neighborhood]) -> ReferenceTables {
    match self.load().await {
      Ok(types) => ReferenceTables::new(&types, neighborhoods),
      Err(e) => {
        warn!(error = %e, "crime types unavailable, using placeholder labels");
        ReferenceTables::new(&[], neighborhoods)
      }
    }
  }

  /// Drop the in-memory table so the next load goes back to cache/API.
  pub fn invalidate(&self) {
    *lock(&self.inner.loaded) = None;
  }
}

async fn fetch_catalog(inner: &CatalogInner) -> Result<Arc<Vec<CrimeType>>, ApiError> {
  match inner.cache.get::<Vec<CrimeType>>(Store::CrimeTypes, CATALOG_KEY).await {
    Ok(Some(types)) => {
      debug!(count = types.len(), "crime types from local cache");
      return Ok(Arc::new(types));
    }
    Ok(None) => {}
    Err(e) => warn!(error = %e, "crime type cache unavailable"),
  }

  let types: Vec<CrimeType> = inner
    .api
    .list_crime_types(&CrimeTypeFilter::default())
    .await?
    .into_iter()
    .map(CrimeType::from)
    .collect();
  debug!(count = types.len(), "crime types from api");

  if let Err(e) = inner
    .cache
    .set(Store::CrimeTypes, CATALOG_KEY, &types, inner.cache.default_ttl())
    .await
  {
    warn!(error = %e, "failed to cache crime types");
  }

  Ok(Arc::new(types))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  // The guarded values are plain snapshots; a panic elsewhere cannot leave
  // them half-written.
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeApi;
  use std::time::Duration;

  #[tokio::test]
  async fn test_concurrent_loads_share_one_request() {
    let api = Arc::new(FakeApi::new().with_delay(Duration::from_millis(20)));
    let catalog = CrimeTypeCatalog::new(api.clone(), LocalCache::in_memory());

    let (a, b, c) = tokio::join!(catalog.load(), catalog.load(), catalog.load());
    assert_eq!(a.unwrap().len(), b.unwrap().len());
    assert!(c.is_ok());
    assert_eq!(api.calls("list_crime_types"), 1);

    // Later loads are served from memory
    catalog.load().await.unwrap();
    assert_eq!(api.calls("list_crime_types"), 1);
  }

  #[tokio::test]
  async fn test_load_prefers_local_cache() {
    let api = Arc::new(FakeApi::new());
    let cache = LocalCache::in_memory();
    let cached = vec![CrimeType {
      id: 9,
      name: "Estelionato".to_string(),
      category: None,
      active: true,
    }];
    cache
      .set(Store::CrimeTypes, CATALOG_KEY, &cached, Duration::from_secs(60))
      .await
      .unwrap();

    let catalog = CrimeTypeCatalog::new(api.clone(), cache);
    assert_eq!(*catalog.load().await.unwrap(), cached);
    assert_eq!(api.calls("list_crime_types"), 0);
  }

  #[tokio::test]
  async fn test_failed_load_is_retried_and_tables_degrade() {
    let api = Arc::new(FakeApi::new());
    api.fail_next("list_crime_types", 1);
    let catalog = CrimeTypeCatalog::new(api.clone(), LocalCache::in_memory());

    let tables = catalog.tables(&[]).await;
    assert!(tables.crime_type_name(1).is_none());

    // The failure is not memoized
    let tables = catalog.tables(&[]).await;
    assert_eq!(tables.crime_type_name(1), Some("Homicídio"));
    assert_eq!(api.calls("list_crime_types"), 2);
  }

  #[test]
  fn test_tables_lookup() {
    let tables = ReferenceTables::new(
      &[],
      &[Neighborhood {
        id: 4,
        name: "Nova Porto Velho".to_string(),
        zone: "Zona Leste".to_string(),
      }],
    );
    assert_eq!(tables.neighborhood(4).map(|n| n.zone.as_str()), Some("Zona Leste"));
    assert!(tables.neighborhood(5).is_none());
  }
}
