use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::api_types::{ApiOcorrencia, ApiPage, ApiTipoCrime};
use super::error::ApiError;
use crate::config::ApiConfig;

/// Maximum length of a response body included in an error message.
const BODY_PREVIEW_LEN: usize = 300;

/// Query parameters for the paginated incident list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListParams {
  pub page: u32,
  pub per_page: u32,
  pub status: Option<String>,
  pub id_tipo_crime: Option<i64>,
  pub id_bairro: Option<i64>,
}

impl Default for ListParams {
  fn default() -> Self {
    Self {
      page: 1,
      per_page: 20,
      status: None,
      id_tipo_crime: None,
      id_bairro: None,
    }
  }
}

impl ListParams {
  pub fn page(page: u32, per_page: u32) -> Self {
    Self {
      page,
      per_page,
      ..Self::default()
    }
  }

  /// Whether `record` passes these filters. Records without a status
  /// count as freshly registered.
  pub fn matches(&self, record: &ApiOcorrencia) -> bool {
    let status = record.status_ocorrencia.as_deref().unwrap_or("Registrada");
    self
      .status
      .as_deref()
      .map_or(true, |wanted| wanted.trim().to_lowercase() == status.trim().to_lowercase())
      && self.id_tipo_crime.map_or(true, |code| record.id_tipo_crime == Some(code))
      && self.id_bairro.map_or(true, |code| record.id_bairro == Some(code))
  }

  fn query_pairs(&self) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
      ("page", self.page.to_string()),
      ("per_page", self.per_page.to_string()),
    ];
    if let Some(status) = &self.status {
      pairs.push(("status_ocorrencia", status.clone()));
    }
    if let Some(code) = self.id_tipo_crime {
      pairs.push(("id_tipo_crime", code.to_string()));
    }
    if let Some(code) = self.id_bairro {
      pairs.push(("id_bairro", code.to_string()));
    }
    pairs
  }
}

/// Filter for the crime-type reference endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CrimeTypeFilter {
  pub active: Option<bool>,
  pub category: Option<String>,
}

/// Operations the backend REST API offers for incidents and reference data.
///
/// [`ApiClient`] is the HTTP implementation; the seam exists so the cache
/// and sync layers can run against any source of truth.
#[async_trait]
pub trait IncidentApi: Send + Sync {
  async fn list_incidents(&self, params: &ListParams) -> Result<ApiPage<ApiOcorrencia>, ApiError>;

  async fn get_incident(&self, id: i64) -> Result<ApiOcorrencia, ApiError>;

  async fn create_incident(&self, payload: &Map<String, Value>) -> Result<ApiOcorrencia, ApiError>;

  /// Partial update; only the fields in `payload` change.
  async fn update_incident(
    &self,
    id: i64,
    payload: &Map<String, Value>,
  ) -> Result<ApiOcorrencia, ApiError>;

  async fn delete_incident(&self, id: i64) -> Result<(), ApiError>;

  async fn list_crime_types(&self, filter: &CrimeTypeFilter) -> Result<Vec<ApiTipoCrime>, ApiError>;
}

/// The reference endpoint answers with either a bare list or a page.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrPage<T> {
  List(Vec<T>),
  Page(ApiPage<T>),
}

impl<T> ListOrPage<T> {
  fn into_items(self) -> Vec<T> {
    match self {
      ListOrPage::List(items) => items,
      ListOrPage::Page(page) => page.items,
    }
  }
}

/// HTTP client for the backend REST API
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  incident_timeout: Duration,
  reference_timeout: Duration,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    // Url::join replaces the last segment unless the base ends with '/'
    let mut base = config.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url =
      Url::parse(&base).map_err(|e| eyre!("Invalid API url '{}': {}", config.url, e))?;

    let http = reqwest::Client::builder()
      .user_agent(concat!("vigia/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      incident_timeout: config.incident_timeout(),
      reference_timeout: config.reference_timeout(),
    })
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path)
      .map_err(|e| ApiError::Request(format!("invalid endpoint '{}': {}", path, e)))
  }

  fn request(&self, method: Method, url: &Url, timeout: Duration) -> RequestBuilder {
    debug!(%method, %url, "api request");
    self.http.request(method, url.clone()).timeout(timeout)
  }

  async fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, ApiError> {
    let response = request
      .send()
      .await
      .map_err(|e| ApiError::from_reqwest(url.as_str(), e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
      url: url.to_string(),
      status,
      message: error_message(&body),
    })
  }

  async fn send_json<T: DeserializeOwned>(
    &self,
    request: RequestBuilder,
    url: &Url,
  ) -> Result<T, ApiError> {
    self
      .send(request, url)
      .await?
      .json()
      .await
      .map_err(|e| ApiError::Decode {
        url: url.to_string(),
        message: e.to_string(),
      })
  }
}

#[async_trait]
impl IncidentApi for ApiClient {
  async fn list_incidents(&self, params: &ListParams) -> Result<ApiPage<ApiOcorrencia>, ApiError> {
    let url = self.endpoint("ocorrencias")?;
    let request = self
      .request(Method::GET, &url, self.incident_timeout)
      .query(&params.query_pairs());
    self.send_json(request, &url).await
  }

  async fn get_incident(&self, id: i64) -> Result<ApiOcorrencia, ApiError> {
    let url = self.endpoint(&format!("ocorrencias/{}", id))?;
    let request = self.request(Method::GET, &url, self.incident_timeout);
    self.send_json(request, &url).await
  }

  async fn create_incident(&self, payload: &Map<String, Value>) -> Result<ApiOcorrencia, ApiError> {
    let url = self.endpoint("ocorrencias")?;
    let request = self
      .request(Method::POST, &url, self.incident_timeout)
      .json(payload);
    self.send_json(request, &url).await
  }

  async fn update_incident(
    &self,
    id: i64,
    payload: &Map<String, Value>,
  ) -> Result<ApiOcorrencia, ApiError> {
    let url = self.endpoint(&format!("ocorrencias/{}", id))?;
    let request = self
      .request(Method::PATCH, &url, self.incident_timeout)
      .json(payload);
    self.send_json(request, &url).await
  }

  async fn delete_incident(&self, id: i64) -> Result<(), ApiError> {
    let url = self.endpoint(&format!("ocorrencias/{}", id))?;
    let request = self.request(Method::DELETE, &url, self.incident_timeout);
    self.send(request, &url).await?;
    Ok(())
  }

  async fn list_crime_types(&self, filter: &CrimeTypeFilter) -> Result<Vec<ApiTipoCrime>, ApiError> {
    let url = self.endpoint("tipos-crime")?;
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(active) = filter.active {
      query.push(("ativo", active.to_string()));
    }
    if let Some(category) = &filter.category {
      query.push(("categoria", category.clone()));
    }

    let request = self
      .request(Method::GET, &url, self.reference_timeout)
      .query(&query);
    let body: ListOrPage<ApiTipoCrime> = self.send_json(request, &url).await?;
    Ok(body.into_items())
  }
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
  if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(body) {
    for field in ["detail", "message", "error"] {
      if let Some(text) = obj.get(field).and_then(|v| v.as_str()) {
        return text.to_string();
      }
    }
  }

  let body = body.trim();
  if body.len() > BODY_PREVIEW_LEN {
    let cut = (0..=BODY_PREVIEW_LEN)
      .rev()
      .find(|i| body.is_char_boundary(*i))
      .unwrap_or(0);
    format!("{}...", &body[..cut])
  } else {
    body.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(url: &str) -> ApiClient {
    ApiClient::new(&ApiConfig {
      url: url.to_string(),
      ..ApiConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let api = client("http://localhost:8000/api/v1");
    assert_eq!(
      api.endpoint("ocorrencias/42").unwrap().as_str(),
      "http://localhost:8000/api/v1/ocorrencias/42"
    );

    let api = client("http://localhost:8000/api/v1/");
    assert_eq!(
      api.endpoint("tipos-crime").unwrap().as_str(),
      "http://localhost:8000/api/v1/tipos-crime"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(ApiClient::new(&ApiConfig {
      url: "not a url".to_string(),
      ..ApiConfig::default()
    })
    .is_err());
  }

  #[test]
  fn test_list_params_query() {
    let params = ListParams {
      status: Some("Registrada".to_string()),
      id_bairro: Some(3),
      ..ListParams::page(2, 50)
    };
    assert_eq!(
      params.query_pairs(),
      vec![
        ("page", "2".to_string()),
        ("per_page", "50".to_string()),
        ("status_ocorrencia", "Registrada".to_string()),
        ("id_bairro", "3".to_string()),
      ]
    );
  }

  #[test]
  fn test_error_message_prefers_json_detail() {
    assert_eq!(error_message(r#"{"detail":"Ocorrência não encontrada"}"#), "Ocorrência não encontrada");
    assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    assert!(error_message(&"x".repeat(1000)).ends_with("..."));
  }

  #[test]
  fn test_reference_body_accepts_list_or_page() {
    let list: ListOrPage<ApiTipoCrime> =
      serde_json::from_str(r#"[{"id_tipo_crime":1,"nome_tipo_crime":"Homicídio"}]"#).unwrap();
    let page: ListOrPage<ApiTipoCrime> =
      serde_json::from_str(r#"{"items":[{"id_tipo_crime":2,"nome_tipo_crime":"Roubo"}]}"#).unwrap();
    assert_eq!(list.into_items()[0].id_tipo_crime, 1);
    assert_eq!(page.into_items()[0].nome_tipo_crime, "Roubo");
  }
}
