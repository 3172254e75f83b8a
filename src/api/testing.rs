//! In-memory [`IncidentApi`] used by tests across the crate.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use super::api_types::{ApiOcorrencia, ApiPage, ApiTipoCrime};
use super::client::{CrimeTypeFilter, IncidentApi, ListParams};
use super::error::ApiError;

pub(crate) struct FakeApi {
  records: Mutex<BTreeMap<i64, ApiOcorrencia>>,
  crime_types: Vec<ApiTipoCrime>,
  calls: Mutex<HashMap<&'static str, usize>>,
  failures: Mutex<HashMap<&'static str, usize>>,
  delay: Duration,
}

impl FakeApi {
  pub(crate) fn new() -> Self {
    let crime_types = [(1, "Homicídio"), (2, "Roubo"), (3, "Latrocínio"), (4, "Furto")]
      .into_iter()
      .map(|(id, name)| ApiTipoCrime {
        id_tipo_crime: id,
        nome_tipo_crime: name.to_string(),
        categoria: None,
        ativo: true,
      })
      .collect();

    Self {
      records: Mutex::new(BTreeMap::new()),
      crime_types,
      calls: Mutex::new(HashMap::new()),
      failures: Mutex::new(HashMap::new()),
      delay: Duration::ZERO,
    }
  }

  pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub(crate) fn with_records(self, records: impl IntoIterator<Item = ApiOcorrencia>) -> Self {
    for record in records {
      self.insert(record);
    }
    self
  }

  pub(crate) fn insert(&self, record: ApiOcorrencia) {
    let id = record.id_ocorrencia.expect("fake records need an id");
    self.records.lock().unwrap().insert(id, record);
  }

  pub(crate) fn calls(&self, method: &str) -> usize {
    self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
  }

  /// Make the next `times` calls of `method` fail with a connection error.
  pub(crate) fn fail_next(&self, method: &'static str, times: usize) {
    self.failures.lock().unwrap().insert(method, times);
  }

  async fn enter(&self, method: &'static str) -> Result<(), ApiError> {
    *self.calls.lock().unwrap().entry(method).or_default() += 1;
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    let mut failures = self.failures.lock().unwrap();
    match failures.get_mut(method) {
      Some(remaining) if *remaining > 0 => {
        *remaining -= 1;
        Err(ApiError::Connect {
          url: format!("fake://{}", method),
          message: "connection refused".to_string(),
        })
      }
      _ => Ok(()),
    }
  }

  fn not_found(id: i64) -> ApiError {
    ApiError::Status {
      url: format!("fake://ocorrencias/{}", id),
      status: StatusCode::NOT_FOUND,
      message: "Ocorrência não encontrada".to_string(),
    }
  }
}

/// A backend record with the fields most tests care about.
pub(crate) fn sample_record(id: i64, crime_type: i64) -> ApiOcorrencia {
  ApiOcorrencia {
    id_ocorrencia: Some(id),
    numero_bo: Some(format!("BO-2024-{:06}", id)),
    id_tipo_crime: Some(crime_type),
    id_bairro: Some(1),
    latitude_ocorrencia: Some("-8.76".to_string()),
    longitude_ocorrencia: Some("-63.90".to_string()),
    status_ocorrencia: Some("Registrada".to_string()),
    data_registro: Some(format!("2024-05-{:02}T14:30:00-04:00", (id % 28) + 1)),
    quantidade_vitimas: Some(0),
    ..ApiOcorrencia::default()
  }
}

fn merge(record: &ApiOcorrencia, payload: &Map<String, Value>) -> ApiOcorrencia {
  let mut value = serde_json::to_value(record).unwrap();
  if let Value::Object(obj) = &mut value {
    for (k, v) in payload {
      obj.insert(k.clone(), v.clone());
    }
  }
  serde_json::from_value(value).unwrap()
}

#[async_trait]
impl IncidentApi for FakeApi {
  async fn list_incidents(&self, params: &ListParams) -> Result<ApiPage<ApiOcorrencia>, ApiError> {
    self.enter("list_incidents").await?;
    let records = self.records.lock().unwrap();
    let matching: Vec<&ApiOcorrencia> = records.values().filter(|r| params.matches(r)).collect();
    let per_page = params.per_page.max(1);
    let total_count = matching.len() as u64;
    let items = matching
      .into_iter()
      .rev()
      .skip(((params.page.max(1) - 1) * per_page) as usize)
      .take(per_page as usize)
      .cloned()
      .collect();

    Ok(ApiPage {
      items,
      current_page: params.page,
      per_page,
      total_pages: total_count.div_ceil(per_page as u64) as u32,
      total_count,
    })
  }

  async fn get_incident(&self, id: i64) -> Result<ApiOcorrencia, ApiError> {
    self.enter("get_incident").await?;
    self
      .records
      .lock()
      .unwrap()
      .get(&id)
      .cloned()
      .ok_or_else(|| Self::not_found(id))
  }

  async fn create_incident(&self, payload: &Map<String, Value>) -> Result<ApiOcorrencia, ApiError> {
    self.enter("create_incident").await?;
    let mut records = self.records.lock().unwrap();
    let id = records.keys().next_back().copied().unwrap_or(0) + 1;
    let mut record = merge(&ApiOcorrencia::default(), payload);
    record.id_ocorrencia = Some(id);
    records.insert(id, record.clone());
    Ok(record)
  }

  async fn update_incident(
    &self,
    id: i64,
    payload: &Map<String, Value>,
  ) -> Result<ApiOcorrencia, ApiError> {
    self.enter("update_incident").await?;
    let mut records = self.records.lock().unwrap();
    let existing = records.get(&id).ok_or_else(|| Self::not_found(id))?;
    let updated = merge(existing, payload);
    records.insert(id, updated.clone());
    Ok(updated)
  }

  async fn delete_incident(&self, id: i64) -> Result<(), ApiError> {
    self.enter("delete_incident").await?;
    self
      .records
      .lock()
      .unwrap()
      .remove(&id)
      .map(|_| ())
      .ok_or_else(|| Self::not_found(id))
  }

  async fn list_crime_types(&self, filter: &CrimeTypeFilter) -> Result<Vec<ApiTipoCrime>, ApiError> {
    self.enter("list_crime_types").await?;
    Ok(
      self
        .crime_types
        .iter()
        .filter(|t| filter.active.map_or(true, |active| t.ativo == active))
        .cloned()
        .collect(),
    )
  }
}
