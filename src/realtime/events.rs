//! Push notification events.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of a push event, from its `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
  IncidentCreated,
  IncidentUpdated,
  IncidentResolved,
  IncidentRemoved,
  SystemMessage,
  ConnectionAck,
  Test,
  /// Any type this client does not know yet
  #[serde(other)]
  Unknown,
}

impl NotificationKind {
  /// Events that change an existing incident.
  pub fn touches_incident(self) -> bool {
    matches!(
      self,
      NotificationKind::IncidentUpdated
        | NotificationKind::IncidentResolved
        | NotificationKind::IncidentRemoved
    )
  }
}

impl fmt::Display for NotificationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NotificationKind::IncidentCreated => "incident_created",
      NotificationKind::IncidentUpdated => "incident_updated",
      NotificationKind::IncidentResolved => "incident_resolved",
      NotificationKind::IncidentRemoved => "incident_removed",
      NotificationKind::SystemMessage => "system_message",
      NotificationKind::ConnectionAck => "connection_ack",
      NotificationKind::Test => "test",
      NotificationKind::Unknown => "unknown",
    })
  }
}

/// A server-pushed event. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(rename = "type")]
  pub kind: NotificationKind,
  /// Backend id of the incident the event is about
  #[serde(
    default,
    deserialize_with = "deserialize_id",
    skip_serializing_if = "Option::is_none"
  )]
  pub incident_id: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub timestamp: Option<String>,
  // Kind-specific payload
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Notification {
  #[cfg(test)]
  pub fn new(kind: NotificationKind) -> Self {
    Self {
      kind,
      incident_id: None,
      title: None,
      message: None,
      timestamp: None,
      extra: Map::new(),
    }
  }

  #[cfg(test)]
  pub fn for_incident(kind: NotificationKind, id: i64) -> Self {
    Self {
      incident_id: Some(id),
      ..Self::new(kind)
    }
  }

  /// One-line summary for logs and the terminal.
  pub fn summary(&self) -> String {
    let mut line = self.kind.to_string();
    if let Some(id) = self.incident_id {
      line.push_str(&format!(" #{}", id));
    }
    match (&self.title, &self.message) {
      (Some(title), Some(message)) => line.push_str(&format!(": {} - {}", title, message)),
      (Some(text), None) | (None, Some(text)) => line.push_str(&format!(": {}", text)),
      (None, None) => {}
    }
    line
  }
}

/// Ids arrive as numbers or numeric strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Option::<Value>::deserialize(deserializer)? {
    Some(Value::Number(n)) => n.as_i64(),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_decode_incident_event() {
    let event: Notification = serde_json::from_value(json!({
      "type": "incident_created",
      "incident_id": "42",
      "title": "Nova ocorrência",
      "message": "Roubo no Centro",
      "timestamp": "2024-05-05T14:30:00-04:00",
      "id_bairro": 1
    }))
    .unwrap();

    assert_eq!(event.kind, NotificationKind::IncidentCreated);
    assert_eq!(event.incident_id, Some(42));
    assert_eq!(event.extra["id_bairro"], 1);
    assert_eq!(event.summary(), "incident_created #42: Nova ocorrência - Roubo no Centro");
  }

  #[test]
  fn test_unknown_type_is_not_fatal() {
    let event: Notification =
      serde_json::from_value(json!({"type": "shift_change", "message": "troca de turno"})).unwrap();
    assert_eq!(event.kind, NotificationKind::Unknown);
    assert_eq!(event.incident_id, None);
    assert_eq!(event.summary(), "unknown: troca de turno");
  }

  #[test]
  fn test_kind_names_match_wire() {
    for kind in [
      NotificationKind::IncidentResolved,
      NotificationKind::ConnectionAck,
      NotificationKind::SystemMessage,
    ] {
      let wire = serde_json::to_value(kind).unwrap();
      assert_eq!(wire, json!(kind.to_string()));
    }
    assert!(NotificationKind::IncidentRemoved.touches_incident());
    assert!(!NotificationKind::IncidentCreated.touches_incident());
  }
}
