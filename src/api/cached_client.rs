//! Cached incident client that wraps the REST API with transparent caching.

use color_eyre::{eyre::WrapErr, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheLayer, CacheResult, LocalCache, Store};
use crate::config::{Config, PriorityPolicy};
use crate::query::{QueryClient, QueryOptions, QueryState};
use crate::realtime::{Notification, NotificationKind};

use super::api_types::ApiOcorrencia;
use super::cache::{IncidentQueryKey, INCIDENTS};
use super::client::{ApiClient, IncidentApi, ListParams};
use super::error::ApiError;
use super::mapper::{classify_priority, count_by_priority, to_backend_payload, to_incident};
use super::reference::CrimeTypeCatalog;
use super::types::{Incident, IncidentPage, Neighborhood, PriorityCounts};

/// Page size used to pull every incident when counting from the network.
const COUNTS_PAGE_SIZE: u32 = 10_000;

/// What the listener did with a push event
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
  /// Event carries nothing to reconcile
  Ignored,
  /// Created incident is already in a cached list
  AlreadyPresent,
  /// No cached first page takes the incident; only counts were invalidated
  CountsInvalidated,
  /// Created incident was spliced at the front of the first pages
  Prepended(Incident),
  /// Local entry refreshed (or dropped, when removed) and incident
  /// queries invalidated
  Invalidated,
}

/// Incident client with transparent caching support.
///
/// Reads go through the local cache and the in-memory query cache;
/// mutations go to the API first and then patch both.
#[derive(Clone)]
pub struct CachedIncidentClient {
  api: Arc<dyn IncidentApi>,
  cache: CacheLayer,
  queries: QueryClient,
  catalog: CrimeTypeCatalog,
  neighborhoods: Arc<Vec<Neighborhood>>,
  policy: Arc<PriorityPolicy>,
}

impl CachedIncidentClient {
  /// Create a client for the configured backend and cache.
  pub fn from_config(config: &Config) -> Result<Self> {
    let api: Arc<dyn IncidentApi> = Arc::new(ApiClient::new(&config.api)?);

    let storage = match (&config.cache.path, config.cache.enabled) {
      (_, false) => LocalCache::in_memory(),
      (Some(path), true) => LocalCache::open(path),
      (None, true) => match LocalCache::default_path() {
        Some(path) => LocalCache::open(path),
        None => {
          warn!("no data directory, keeping the cache in memory");
          LocalCache::in_memory()
        }
      },
    };

    let options = QueryOptions {
      stale_time: std::time::Duration::from_secs(config.query.stale_minutes * 60),
      retries: config.query.retries,
      ..QueryOptions::default()
    };

    Ok(Self::new(
      api,
      storage.with_default_ttl(config.cache.ttl()),
      QueryClient::new(options),
      config.neighborhoods.clone(),
      config.priority.clone(),
    ))
  }

  pub fn new(
    api: Arc<dyn IncidentApi>,
    storage: LocalCache,
    queries: QueryClient,
    neighborhoods: Vec<Neighborhood>,
    policy: PriorityPolicy,
  ) -> Self {
    Self {
      catalog: CrimeTypeCatalog::new(Arc::clone(&api), storage.clone()),
      api,
      cache: CacheLayer::new(storage),
      queries,
      neighborhoods: Arc::new(neighborhoods),
      policy: Arc::new(policy),
    }
  }

  #[cfg(test)]
  pub fn queries(&self) -> &QueryClient {
    &self.queries
  }

  pub fn storage(&self) -> &LocalCache {
    self.cache.storage()
  }

  /// Empty every local store and forget all in-memory results.
  pub async fn clear_local(&self) -> Result<()> {
    for store in Store::ALL {
      self
        .storage()
        .clear(store)
        .await
        .wrap_err_with(|| format!("Failed to clear {}", store))?;
    }
    self.catalog.invalidate();
    self.queries.invalidate(INCIDENTS);
    info!("local cache cleared");
    Ok(())
  }

  async fn map_record(&self, record: &ApiOcorrencia) -> Incident {
    let refs = self.catalog.tables(&self.neighborhoods).await;
    to_incident(record, &refs, &self.policy)
  }

  /// Load one incident, local cache first.
  ///
  /// A hit is mapped without touching the network; a miss is fetched,
  /// mapped and written through.
  pub async fn load_incident(&self, id: i64) -> Result<CacheResult<Incident>, ApiError> {
    let api = Arc::clone(&self.api);
    let result = self
      .cache
      .fetch_one::<ApiOcorrencia, _, _, _>(&id.to_string(), || async move {
        api.get_incident(id).await
      })
      .await?;

    debug!(id, source = ?result.source, "loaded incident");
    let incident = self.map_record(&result.data).await;
    Ok(result.map(|_| incident))
  }

  /// Get one incident through the query cache.
  pub async fn get_incident(&self, id: i64) -> Result<Arc<Incident>> {
    let this = self.clone();
    self
      .queries
      .fetch(&IncidentQueryKey::Detail { id }, move || {
        let this = this.clone();
        async move { Ok::<_, color_eyre::Report>(this.load_incident(id).await?.data) }
      })
      .await
  }

  /// Get one page of incidents through the query cache. Every fetched
  /// record is written through to the local cache.
  pub async fn list_incidents(&self, params: &ListParams) -> Result<Arc<IncidentPage>> {
    let this = self.clone();
    let key = IncidentQueryKey::List(params.clone());
    let params = params.clone();

    self
      .queries
      .fetch(&key, move || {
        let this = this.clone();
        let params = params.clone();
        async move { Ok::<_, color_eyre::Report>(this.fetch_page(&params).await?) }
      })
      .await
  }

  async fn fetch_page(&self, params: &ListParams) -> Result<IncidentPage, ApiError> {
    let page = self.api.list_incidents(params).await?;
    self.cache.write_through(&page.items).await;

    let refs = self.catalog.tables(&self.neighborhoods).await;
    Ok(IncidentPage {
      items: page
        .items
        .iter()
        .map(|record| to_incident(record, &refs, &self.policy))
        .collect(),
      current_page: page.current_page,
      per_page: page.per_page,
      total_pages: page.total_pages,
      total_count: page.total_count,
    })
  }

  /// Page currently held by the query cache, without fetching.
  #[cfg(test)]
  pub fn cached_page(&self, params: &ListParams) -> Option<Arc<IncidentPage>> {
    self
      .queries
      .get_data(&IncidentQueryKey::List(params.clone()))
  }

  /// Query state of a list page, without fetching.
  pub fn page_state(&self, params: &ListParams) -> QueryState<Arc<IncidentPage>> {
    self.queries.state(&IncidentQueryKey::List(params.clone()))
  }

  /// Priority counts through the query cache.
  pub async fn counts(&self) -> Result<Arc<PriorityCounts>> {
    let this = self.clone();
    self
      .queries
      .fetch(&IncidentQueryKey::Counts, move || {
        let this = this.clone();
        async move { Ok::<_, color_eyre::Report>(this.load_counts().await?.data) }
      })
      .await
  }

  /// Count incidents by priority, from the local cache when it holds any.
  pub async fn load_counts(&self) -> Result<CacheResult<PriorityCounts>, ApiError> {
    let api = Arc::clone(&self.api);
    let result = self
      .cache
      .scan_or_fetch::<ApiOcorrencia, _, _, _>(|| async move {
        let page = api
          .list_incidents(&ListParams::page(1, COUNTS_PAGE_SIZE))
          .await?;
        Ok::<_, ApiError>(page.items)
      })
      .await?;

    let policy = Arc::clone(&self.policy);
    Ok(result.map(|records| {
      count_by_priority(records.iter().map(|record| classify_priority(record, &policy)))
    }))
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Create an incident. The API call comes first; on success the record
  /// is cached and prepended to the cached first pages.
  pub async fn create_incident(&self, incident: &Incident) -> Result<Incident, ApiError> {
    let payload = to_backend_payload(incident, &record_fields(&incident.api_data));
    let record = self.api.create_incident(&payload).await?;
    self.cache.write_through(std::slice::from_ref(&record)).await;

    let created = self.map_record(&record).await;
    info!(id = %created.id, "created incident");
    self.prepend(&created);
    if let Some(id) = created.backend_id() {
      self
        .queries
        .set_data(&IncidentQueryKey::Detail { id }, |_| Some(created.clone()));
    }
    self.queries.invalidate_key(&IncidentQueryKey::Counts);
    Ok(created)
  }

  /// Update an incident and replace it, by backend id, wherever it is cached.
  pub async fn update_incident(&self, incident: &Incident) -> Result<Incident, ApiError> {
    let id = incident
      .backend_id()
      .ok_or_else(|| ApiError::Request(format!("incident {} has no backend id", incident.id)))?;

    let payload = to_backend_payload(incident, &record_fields(&incident.api_data));
    let record = self.api.update_incident(id, &payload).await?;
    self.cache.write_through(std::slice::from_ref(&record)).await;

    let updated = self.map_record(&record).await;
    info!(id = %updated.id, "updated incident");
    self
      .queries
      .update_where::<IncidentQueryKey, IncidentPage>(INCIDENTS, |key, page| {
        if !key.admits(&record) {
          return None;
        }
        let position = page.items.iter().position(|i| i.backend_id() == Some(id))?;
        let mut page = page.clone();
        page.items[position] = updated.clone();
        Some(page)
      });
    // Filtered lists the record no longer (or now) belongs to
    self
      .queries
      .invalidate_where::<IncidentQueryKey>(INCIDENTS, |key| {
        matches!(key, IncidentQueryKey::List(_)) && !key.admits(&record)
      });
    self
      .queries
      .set_data(&IncidentQueryKey::Detail { id }, |_| Some(updated.clone()));
    self.queries.invalidate_key(&IncidentQueryKey::Counts);
    Ok(updated)
  }

  /// Delete an incident and drop it from every cache.
  pub async fn delete_incident(&self, id: i64) -> Result<(), ApiError> {
    self.api.delete_incident(id).await?;
    self.cache.evict::<ApiOcorrencia>(&id.to_string()).await;

    info!(id, "deleted incident");
    self
      .queries
      .update_where::<IncidentQueryKey, IncidentPage>(INCIDENTS, |_, page| {
        if !page.contains_backend_id(id) {
          return None;
        }
        let mut page = page.clone();
        page.items.retain(|i| i.backend_id() != Some(id));
        page.total_count = page.total_count.saturating_sub(1);
        Some(page)
      });
    self.queries.remove(&IncidentQueryKey::Detail { id });
    self.queries.invalidate_key(&IncidentQueryKey::Counts);
    Ok(())
  }

  /// Insert an incident at the front of every cached first page whose
  /// filters admit it and that does not hold it yet.
  fn prepend(&self, incident: &Incident) -> usize {
    let Some(id) = incident.backend_id() else {
      return 0;
    };
    self
      .queries
      .update_where::<IncidentQueryKey, IncidentPage>(INCIDENTS, |key, page| {
        if !key.is_first_page() || !key.admits(&incident.api_data) || page.contains_backend_id(id) {
          return None;
        }
        let mut page = page.clone();
        page.items.insert(0, incident.clone());
        page.total_count += 1;
        Some(page)
      })
  }

  // ==========================================================================
  // Push reconciliation
  // ==========================================================================

  /// Reconcile a push event with the cached incident data.
  pub async fn apply_notification(&self, event: &Notification) -> Result<SyncAction, ApiError> {
    let Some(id) = event.incident_id else {
      return Ok(SyncAction::Ignored);
    };

    match event.kind {
      NotificationKind::IncidentCreated => {
        if self
          .queries
          .any::<IncidentQueryKey, IncidentPage>(INCIDENTS, |_, page| page.contains_backend_id(id))
        {
          debug!(id, "created incident already cached");
          return Ok(SyncAction::AlreadyPresent);
        }

        self.queries.invalidate_key(&IncidentQueryKey::Counts);
        if !self
          .queries
          .any::<IncidentQueryKey, IncidentPage>(INCIDENTS, |key, _| key.is_first_page())
        {
          debug!(id, "no first page cached, counts invalidated");
          return Ok(SyncAction::CountsInvalidated);
        }

        let incident = self.load_incident(id).await?.data;
        if self.prepend(&incident) == 0 {
          debug!(id, "no cached first page admits the created incident");
          return Ok(SyncAction::CountsInvalidated);
        }
        debug!(id, display_id = %incident.id, "prepended created incident");
        Ok(SyncAction::Prepended(incident))
      }
      NotificationKind::IncidentRemoved => {
        self.cache.evict::<ApiOcorrencia>(&id.to_string()).await;
        self.queries.remove(&IncidentQueryKey::Detail { id });
        let count = self.queries.invalidate(INCIDENTS);
        debug!(id, count, "incident removed remotely, queries invalidated");
        Ok(SyncAction::Invalidated)
      }
      kind if kind.touches_incident() => {
        self.refresh_record(id).await;
        let count = self.queries.invalidate(INCIDENTS);
        debug!(id, %kind, count, "incident changed remotely, queries invalidated");
        Ok(SyncAction::Invalidated)
      }
      _ => Ok(SyncAction::Ignored),
    }
  }

  /// Replace the local copy of a record with the server's. The cached copy
  /// stays when the server cannot be reached; a record the server no longer
  /// has is dropped.
  async fn refresh_record(&self, id: i64) {
    match self.api.get_incident(id).await {
      Ok(record) => self.cache.write_through(std::slice::from_ref(&record)).await,
      Err(e) if e.is_not_found() => self.cache.evict::<ApiOcorrencia>(&id.to_string()).await,
      Err(e) => warn!(id, error = %e, "could not refresh changed incident, keeping cached copy"),
    }
  }
}

/// Backend fields of a record, minus its id, as the base of a write payload.
fn record_fields(record: &ApiOcorrencia) -> Map<String, Value> {
  match serde_json::to_value(record) {
    Ok(Value::Object(mut fields)) => {
      fields.remove("id_ocorrencia");
      fields
    }
    _ => Map::new(),
  }
}
