//! Plain-text rendering for the terminal.

use std::fmt::Write;
use std::sync::Arc;

use crate::api::{Incident, IncidentPage, Priority, PriorityCounts};
use crate::query::QueryState;
use crate::realtime::{Notification, NotificationKind};

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Short marker for a priority bucket
pub fn priority_marker(priority: Priority) -> &'static str {
  match priority {
    Priority::High => "!!!",
    Priority::Medium => "!! ",
    Priority::Low => "!  ",
  }
}

/// One table row per incident
pub fn incident_row(incident: &Incident) -> String {
  format!(
    "{:<8} {} {:<16} {:<18} {:<16} {}",
    incident.id,
    priority_marker(incident.priority),
    truncate(&incident.status, 16),
    truncate(&incident.incident_type, 18),
    truncate(&incident.bairro, 16),
    truncate(&incident.description, 48),
  )
}

pub fn page(page: &IncidentPage) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "{:<8} {} {:<16} {:<18} {:<16} {}",
    "ID", "PRI", "STATUS", "TYPE", "NEIGHBORHOOD", "DESCRIPTION"
  );
  for incident in &page.items {
    let _ = writeln!(out, "{}", incident_row(incident));
  }
  let _ = write!(
    out,
    "page {}/{} ({} incidents)",
    page.current_page,
    page.total_pages.max(1),
    page.total_count
  );
  out
}

pub fn counts(counts: &PriorityCounts) -> String {
  format!(
    "total {}  high {}  medium {}  low {}",
    counts.total, counts.high, counts.medium, counts.low
  )
}

pub fn incident_detail(incident: &Incident) -> String {
  let mut out = String::new();
  let _ = writeln!(out, "{}  [{}]  {}", incident.id, incident.priority, incident.status);
  let _ = writeln!(out, "type:        {}", incident.incident_type);
  let _ = writeln!(out, "description: {}", incident.description);
  let _ = writeln!(out, "location:    {}", incident.location);
  let _ = writeln!(out, "area:        {} ({})", incident.bairro, incident.zone);
  let _ = writeln!(out, "coordinates: {:.5}, {:.5}", incident.lat, incident.lng);
  let _ = write!(out, "registered:  {}", incident.timestamp);
  if let Some(bo) = &incident.api_data.numero_bo {
    let _ = write!(out, "\nBO:          {}", bo);
  }
  out
}

/// One line for a push event
pub fn notification(event: &Notification) -> String {
  let tag = match event.kind {
    NotificationKind::IncidentCreated => "NEW",
    NotificationKind::IncidentUpdated => "UPD",
    NotificationKind::IncidentResolved => "OK ",
    NotificationKind::IncidentRemoved => "DEL",
    NotificationKind::SystemMessage => "SYS",
    NotificationKind::Test => "TST",
    NotificationKind::ConnectionAck | NotificationKind::Unknown => "---",
  };
  match &event.timestamp {
    Some(time) => format!("[{}] {} {}", tag, time, event.summary()),
    None => format!("[{}] {}", tag, event.summary()),
  }
}

/// Connectivity indicator, push events since the last status, and the watched page
pub fn status(
  connected: bool,
  received: usize,
  last: Option<&Notification>,
  page: &QueryState<Arc<IncidentPage>>,
) -> String {
  let mut out = String::from(if connected { "[live]" } else { "[offline]" });
  let _ = write!(out, " {} push events", received);
  if let Some(event) = last {
    let _ = write!(out, ", last {}", truncate(&event.summary(), 48));
  }
  let _ = match page {
    QueryState::Idle => write!(out, " | page not loaded"),
    QueryState::Loading => write!(out, " | page loading"),
    QueryState::Success(page) => write!(
      out,
      " | page {} ({} of {})",
      page.current_page,
      page.items.len(),
      page.total_count
    ),
    QueryState::Error(e) => write!(out, " | page failed: {}", truncate(e, 48)),
  };
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_counts_characters() {
    assert_eq!(truncate("Latrocínio em via pública", 10), "Latrocí...");
  }

  #[test]
  fn test_counts_line() {
    let line = counts(&PriorityCounts {
      total: 4,
      high: 1,
      medium: 2,
      low: 1,
    });
    assert_eq!(line, "total 4  high 1  medium 2  low 1");
  }

  #[test]
  fn test_status_line_offline_without_page() {
    assert_eq!(
      status(false, 0, None, &QueryState::Idle),
      "[offline] 0 push events | page not loaded"
    );
  }

  #[test]
  fn test_status_line_live_with_page() {
    let event = Notification::for_incident(NotificationKind::IncidentCreated, 9);
    let page = IncidentPage {
      items: Vec::new(),
      total_count: 12,
      current_page: 2,
      per_page: 5,
      total_pages: 3,
    };
    assert_eq!(
      status(true, 3, Some(&event), &QueryState::Success(Arc::new(page))),
      "[live] 3 push events, last incident_created #9 | page 2 (0 of 12)"
    );
  }

  #[test]
  fn test_status_line_page_error() {
    let line = status(true, 0, None, &QueryState::Error("connection refused".to_string()));
    assert!(line.ends_with("| page failed: connection refused"));
  }

  #[test]
  fn test_notification_line() {
    let mut event = Notification::for_incident(NotificationKind::IncidentResolved, 7);
    event.title = Some("Ocorrência resolvida".to_string());
    assert_eq!(notification(&event), "[OK ] incident_resolved #7: Ocorrência resolvida");
  }
}
