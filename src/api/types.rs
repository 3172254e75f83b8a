use serde::{Deserialize, Serialize};
use std::fmt;

use super::api_types::ApiOcorrencia;

/// Derived severity of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low,
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Priority::High => "high",
      Priority::Medium => "medium",
      Priority::Low => "low",
    })
  }
}

/// Incident as the dashboard models it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
  /// Display id, e.g. "OC-0042"
  pub id: String,
  #[serde(rename = "type")]
  pub incident_type: String,
  pub description: String,
  pub location: String,
  pub zone: String,
  pub bairro: String,
  pub lat: f64,
  pub lng: f64,
  pub coordinates: [f64; 2],
  pub priority: Priority,
  pub status: String,
  pub timestamp: String,
  /// Original backend record, kept so write-back does not lose fields
  #[serde(rename = "_apiData")]
  pub api_data: ApiOcorrencia,
}

impl Incident {
  /// Backend numeric id. This, not the display id, identifies an incident
  /// across collections.
  pub fn backend_id(&self) -> Option<i64> {
    self.api_data.id_ocorrencia
  }
}

/// Incident counts per priority bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityCounts {
  pub total: u64,
  pub high: u64,
  pub medium: u64,
  pub low: u64,
}

impl PriorityCounts {
  pub fn record(&mut self, priority: Priority) {
    self.total += 1;
    match priority {
      Priority::High => self.high += 1,
      Priority::Medium => self.medium += 1,
      Priority::Low => self.low += 1,
    }
  }
}

/// One page of mapped incidents, most recent first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentPage {
  pub items: Vec<Incident>,
  pub current_page: u32,
  pub per_page: u32,
  pub total_pages: u32,
  pub total_count: u64,
}

impl IncidentPage {
  pub fn contains_backend_id(&self, id: i64) -> bool {
    self.items.iter().any(|i| i.backend_id() == Some(id))
  }
}

/// Crime-type reference entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrimeType {
  pub id: i64,
  pub name: String,
  pub category: Option<String>,
  pub active: bool,
}

/// Neighborhood reference entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighborhood {
  pub id: i64,
  pub name: String,
  pub zone: String,
}
