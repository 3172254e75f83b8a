//! Conversions between backend records and the dashboard's incident model.
//!
//! Mapping never fails: unknown codes get placeholder labels, bad
//! coordinates become `0`, unknown statuses pass through.

use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike, Weekday};
use serde_json::{Map, Value};
use tracing::warn;

use super::api_types::ApiOcorrencia;
use super::reference::ReferenceLookup;
use super::types::{Incident, Priority, PriorityCounts};
use crate::config::PriorityPolicy;

/// Backend status → display label
const STATUS_LABELS: [(&str, &str); 4] = [
  ("Registrada", "Pendente"),
  ("Em Investigação", "Em Investigação"),
  ("Resolvida", "Resolvido"),
  ("Arquivada", "Arquivado"),
];

const UNKNOWN_ZONE: &str = "Zona não informada";

pub fn status_label(backend: &str) -> String {
  STATUS_LABELS
    .iter()
    .find(|(b, _)| *b == backend)
    .map(|(_, label)| (*label).to_string())
    .unwrap_or_else(|| backend.to_string())
}

pub fn backend_status(label: &str) -> String {
  STATUS_LABELS
    .iter()
    .find(|(_, l)| *l == label)
    .map(|(b, _)| (*b).to_string())
    .unwrap_or_else(|| label.to_string())
}

/// Parse a decimal coordinate, falling back to `0`.
pub fn parse_coordinate(raw: Option<&str>) -> f64 {
  raw
    .and_then(|s| s.trim().parse::<f64>().ok())
    .filter(|v| v.is_finite())
    .unwrap_or(0.0)
}

pub fn classify_priority(record: &ApiOcorrencia, policy: &PriorityPolicy) -> Priority {
  if record
    .id_tipo_crime
    .is_some_and(|code| policy.high_crime_types.contains(&code))
  {
    return Priority::High;
  }

  let has_victims = record.quantidade_vitimas.unwrap_or(0) > 0;
  let heavy_loss = record
    .loss_amount()
    .is_some_and(|v| v > policy.loss_threshold);

  if has_victims || heavy_loss {
    Priority::Medium
  } else {
    Priority::Low
  }
}

/// Display id: `OC-` plus the zero-padded backend id, else the BO serial.
pub fn display_id(record: &ApiOcorrencia) -> String {
  if let Some(id) = record.id_ocorrencia {
    return format!("OC-{:04}", id);
  }

  if let Some(serial) = record.numero_bo.as_deref().and_then(bo_serial) {
    return format!("OC-{:04}", serial);
  }

  // TODO: reject records without id and serial once the backend guarantees one
  let placeholder = (uuid::Uuid::new_v4().as_u128() % 10_000) as u64;
  warn!(placeholder, "record has neither id nor BO number, minting a placeholder id");
  format!("OC-{:04}", placeholder)
}

/// Last run of digits in a BO number, e.g. `BO-2024-000123` → 123.
fn bo_serial(numero_bo: &str) -> Option<u64> {
  numero_bo
    .split(|c: char| !c.is_ascii_digit())
    .filter(|run| !run.is_empty())
    .last()
    .and_then(|run| run.parse().ok())
}

pub fn to_incident(
  record: &ApiOcorrencia,
  refs: &impl ReferenceLookup,
  policy: &PriorityPolicy,
) -> Incident {
  let incident_type = match record.id_tipo_crime {
    Some(code) => refs
      .crime_type_name(code)
      .map(String::from)
      .unwrap_or_else(|| format!("Tipo {}", code)),
    None => "Tipo não informado".to_string(),
  };

  let (bairro, zone) = match record.id_bairro {
    Some(code) => match refs.neighborhood(code) {
      Some(n) => (n.name.clone(), n.zone.clone()),
      None => (format!("Bairro {}", code), UNKNOWN_ZONE.to_string()),
    },
    None => ("Bairro não informado".to_string(), UNKNOWN_ZONE.to_string()),
  };

  let lat = parse_coordinate(record.latitude_ocorrencia.as_deref());
  let lng = parse_coordinate(record.longitude_ocorrencia.as_deref());

  Incident {
    id: display_id(record),
    description: non_empty(record.descricao_ocorrencia.as_deref())
      .unwrap_or(&incident_type)
      .to_string(),
    location: non_empty(record.endereco_ocorrencia.as_deref())
      .unwrap_or(&bairro)
      .to_string(),
    incident_type,
    zone,
    bairro,
    lat,
    lng,
    coordinates: [lat, lng],
    priority: classify_priority(record, policy),
    status: status_label(record.status_ocorrencia.as_deref().unwrap_or("Registrada")),
    timestamp: record
      .data_registro
      .clone()
      .or_else(|| record.data_ocorrencia.clone())
      .unwrap_or_default(),
    api_data: record.clone(),
  }
}

/// Rebuild a backend-shaped partial record from an incident.
///
/// `extras` go in first; the incident fields listed below then overwrite
/// any extra with the same name.
pub fn to_backend_payload(incident: &Incident, extras: &Map<String, Value>) -> Map<String, Value> {
  let mut payload = extras.clone();
  let api = &incident.api_data;

  if let Some(code) = api.id_tipo_crime {
    payload.insert("id_tipo_crime".into(), code.into());
  }
  if let Some(code) = api.id_bairro {
    payload.insert("id_bairro".into(), code.into());
  }
  if let Some(text) = non_empty(Some(&incident.description)) {
    payload.insert("descricao_ocorrencia".into(), text.into());
  }
  if let Some(text) = non_empty(Some(&incident.location)) {
    payload.insert("endereco_ocorrencia".into(), text.into());
  }
  payload.insert("latitude_ocorrencia".into(), incident.lat.to_string().into());
  payload.insert("longitude_ocorrencia".into(), incident.lng.to_string().into());
  payload.insert("status_ocorrencia".into(), backend_status(&incident.status).into());

  let (weekday, hour) = calendar_fields(&incident.timestamp);
  payload.insert("dia_semana".into(), weekday_name(weekday).into());
  payload.insert("periodo_dia".into(), day_period(hour).into());

  payload
}

pub fn weekday_name(day: Weekday) -> &'static str {
  match day {
    Weekday::Sun => "Domingo",
    Weekday::Mon => "Segunda-feira",
    Weekday::Tue => "Terça-feira",
    Weekday::Wed => "Quarta-feira",
    Weekday::Thu => "Quinta-feira",
    Weekday::Fri => "Sexta-feira",
    Weekday::Sat => "Sábado",
  }
}

/// Bucket an hour of day: [0,6) dawn, [6,12) morning, [12,18) afternoon, [18,24) night.
pub fn day_period(hour: u32) -> &'static str {
  match hour {
    0..=5 => "Madrugada",
    6..=11 => "Manhã",
    12..=17 => "Tarde",
    _ => "Noite",
  }
}

/// Weekday and hour of a timestamp in its own offset; local "now" when the
/// timestamp is missing or unparseable.
fn calendar_fields(timestamp: &str) -> (Weekday, u32) {
  let timestamp = timestamp.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
    return (dt.weekday(), dt.hour());
  }
  for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(timestamp, format) {
      return (dt.weekday(), dt.hour());
    }
  }

  let now = Local::now();
  (now.weekday(), now.hour())
}

pub fn count_by_priority(priorities: impl IntoIterator<Item = Priority>) -> PriorityCounts {
  let mut counts = PriorityCounts::default();
  for priority in priorities {
    counts.record(priority);
  }
  counts
}

fn non_empty(s: Option<&str>) -> Option<&str> {
  s.filter(|s| !s.trim().is_empty())
}
