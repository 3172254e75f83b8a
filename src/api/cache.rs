//! Caching implementations for incident types.

use sha2::{Digest, Sha256};

use crate::cache::{Cacheable, Store};
use crate::query::QueryKey;

use super::api_types::ApiOcorrencia;
use super::client::ListParams;

/// Entity name shared by every incident query, used for invalidation.
pub const INCIDENTS: &str = "incidents";

// ============================================================================
// Cacheable implementations
// ============================================================================

impl Cacheable for ApiOcorrencia {
  fn cache_key(&self) -> String {
    match (self.id_ocorrencia, &self.numero_bo) {
      (Some(id), _) => id.to_string(),
      (None, Some(bo)) => format!("bo:{}", bo),
      (None, None) => String::new(),
    }
  }

  fn store() -> Store {
    Store::Incidents
  }
}

// ============================================================================
// Query key types
// ============================================================================

/// Query key types for incident API calls.
#[derive(Clone, Debug)]
pub enum IncidentQueryKey {
  /// One page of the incident list
  List(ListParams),
  /// A single incident by backend id
  Detail { id: i64 },
  /// Priority counts over all incidents
  Counts,
}

impl IncidentQueryKey {
  /// Whether this key is a first page, where new incidents appear.
  pub fn is_first_page(&self) -> bool {
    matches!(self, Self::List(params) if params.page <= 1)
  }

  /// Whether `record` can be part of this query's result.
  pub fn admits(&self, record: &ApiOcorrencia) -> bool {
    match self {
      Self::List(params) => params.matches(record),
      Self::Detail { id } => record.id_ocorrencia == Some(*id),
      Self::Counts => true,
    }
  }
}

impl QueryKey for IncidentQueryKey {
  fn cache_hash(&self) -> String {
    let input = match self {
      Self::List(params) => format!(
        "incident_list:{}:{}:{}:{}:{}",
        params.page,
        params.per_page,
        params.status.as_deref().map(normalize).unwrap_or_default(),
        params.id_tipo_crime.map(|c| c.to_string()).unwrap_or_default(),
        params.id_bairro.map(|c| c.to_string()).unwrap_or_default(),
      ),
      Self::Detail { id } => format!("incident_detail:{}", id),
      Self::Counts => "incident_counts".to_string(),
    };

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    match self {
      Self::List(params) => {
        let mut desc = format!("incidents page {} ({} per page)", params.page, params.per_page);
        if let Some(status) = &params.status {
          desc.push_str(&format!(", status {}", status));
        }
        if let Some(code) = params.id_tipo_crime {
          desc.push_str(&format!(", crime type {}", code));
        }
        if let Some(code) = params.id_bairro {
          desc.push_str(&format!(", neighborhood {}", code));
        }
        desc
      }
      Self::Detail { id } => format!("incident {}", id),
      Self::Counts => "incident counts".to_string(),
    }
  }

  fn entity(&self) -> &'static str {
    INCIDENTS
  }
}

/// Normalize filter text for consistent hashing.
fn normalize(value: &str) -> String {
  value.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_cache_key() {
    let mut record = ApiOcorrencia {
      id_ocorrencia: Some(42),
      numero_bo: Some("BO-2024-000042".to_string()),
      ..ApiOcorrencia::default()
    };
    assert_eq!(record.cache_key(), "42");

    record.id_ocorrencia = None;
    assert_eq!(record.cache_key(), "bo:BO-2024-000042");

    record.numero_bo = None;
    assert_eq!(record.cache_key(), "");
  }

  #[tokio::test]
  async fn test_records_without_identity_are_not_cached() {
    use crate::cache::{CacheLayer, LocalCache};

    let layer = CacheLayer::new(LocalCache::in_memory());
    let anonymous = |text: &str| ApiOcorrencia {
      descricao_ocorrencia: Some(text.to_string()),
      ..ApiOcorrencia::default()
    };
    layer
      .write_through(&[anonymous("primeira"), anonymous("segunda")])
      .await;

    let stored: Vec<ApiOcorrencia> = layer.storage().get_all(Store::Incidents).await.unwrap();
    assert!(stored.is_empty());
  }

  #[test]
  fn test_hash_is_stable_and_filter_sensitive() {
    let a = IncidentQueryKey::List(ListParams::default());
    let b = IncidentQueryKey::List(ListParams::default());
    assert_eq!(a.cache_hash(), b.cache_hash());
    assert_eq!(a.cache_hash().len(), 64);

    let filtered = IncidentQueryKey::List(ListParams {
      status: Some(" Registrada ".to_string()),
      ..ListParams::default()
    });
    let same_filter = IncidentQueryKey::List(ListParams {
      status: Some("registrada".to_string()),
      ..ListParams::default()
    });
    assert_ne!(a.cache_hash(), filtered.cache_hash());
    assert_eq!(filtered.cache_hash(), same_filter.cache_hash());
    assert_ne!(
      IncidentQueryKey::Detail { id: 1 }.cache_hash(),
      IncidentQueryKey::Counts.cache_hash()
    );
  }

  #[test]
  fn test_first_page_detection() {
    assert!(IncidentQueryKey::List(ListParams::page(1, 10)).is_first_page());
    assert!(!IncidentQueryKey::List(ListParams::page(2, 10)).is_first_page());
    assert!(!IncidentQueryKey::Counts.is_first_page());
  }

  #[test]
  fn test_admits_follows_list_filters() {
    let record = ApiOcorrencia {
      id_ocorrencia: Some(5),
      id_tipo_crime: Some(2),
      id_bairro: Some(1),
      status_ocorrencia: Some("Registrada".to_string()),
      ..ApiOcorrencia::default()
    };
    let list = |params: ListParams| IncidentQueryKey::List(params);

    assert!(list(ListParams::default()).admits(&record));
    assert!(list(ListParams {
      status: Some(" registrada ".to_string()),
      id_bairro: Some(1),
      ..ListParams::default()
    })
    .admits(&record));
    assert!(!list(ListParams {
      status: Some("Resolvida".to_string()),
      ..ListParams::default()
    })
    .admits(&record));
    assert!(!list(ListParams {
      id_tipo_crime: Some(4),
      ..ListParams::default()
    })
    .admits(&record));
    assert!(IncidentQueryKey::Detail { id: 5 }.admits(&record));
    assert!(!IncidentQueryKey::Detail { id: 6 }.admits(&record));
  }

  #[test]
  fn test_description() {
    let key = IncidentQueryKey::List(ListParams {
      id_bairro: Some(3),
      ..ListParams::page(2, 50)
    });
    assert_eq!(key.description(), "incidents page 2 (50 per page), neighborhood 3");
    assert_eq!(IncidentQueryKey::Detail { id: 9 }.description(), "incident 9");
  }
}
