use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::types::Neighborhood;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub query: QueryConfig,
  #[serde(default)]
  pub priority: PriorityPolicy,
  #[serde(default)]
  pub device: DeviceConfig,
  /// Neighborhood reference table (id → name, zone)
  #[serde(default)]
  pub neighborhoods: Vec<Neighborhood>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the REST API
  pub url: String,
  /// URL of the push notification endpoint
  pub realtime_url: String,
  /// Channel the push subscription joins
  pub channel: String,
  pub incident_timeout_secs: u64,
  pub reference_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8000/api/v1".to_string(),
      realtime_url: "ws://localhost:8000/ws/notificacoes".to_string(),
      channel: "notificacoes".to_string(),
      incident_timeout_secs: 30,
      reference_timeout_secs: 10,
    }
  }
}

impl ApiConfig {
  pub fn incident_timeout(&self) -> Duration {
    Duration::from_secs(self.incident_timeout_secs)
  }

  pub fn reference_timeout(&self) -> Duration {
    Duration::from_secs(self.reference_timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to run remote-only
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/vigia/cache.db)
  pub path: Option<PathBuf>,
  pub ttl_minutes: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      ttl_minutes: 10,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_minutes * 60)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
  /// How long a query result stays fresh
  pub stale_minutes: u64,
  /// Retries after a failed fetch
  pub retries: u32,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_minutes: 5,
      retries: 2,
    }
  }
}

/// Rule for deriving incident priority.
///
/// The crime-type codes and the loss threshold are provisional and expected
/// to follow the backend's crime-type table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PriorityPolicy {
  /// Crime-type codes that always yield high priority
  pub high_crime_types: BTreeSet<i64>,
  /// Loss value above which an incident is at least medium
  pub loss_threshold: f64,
}

impl Default for PriorityPolicy {
  fn default() -> Self {
    Self {
      high_crime_types: [1, 2, 3].into_iter().collect(),
      loss_threshold: 1000.0,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
  /// Width of the display the client runs on, in CSS pixels
  pub viewport_width: Option<u32>,
  pub user_agent: Option<String>,
  /// Where the device id is persisted (defaults to $XDG_DATA_HOME/vigia/device_id)
  pub id_path: Option<PathBuf>,
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vigia.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vigia/config.yaml
  ///
  /// Without a file the defaults apply. `VIGIA_API_URL` and
  /// `VIGIA_REALTIME_URL` override the endpoints either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env_overrides(|name| std::env::var(name).ok());

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vigia.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vigia").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(url) = var("VIGIA_API_URL").filter(|v| !v.is_empty()) {
      self.api.url = url;
    }
    if let Some(url) = var("VIGIA_REALTIME_URL").filter(|v| !v.is_empty()) {
      self.api.realtime_url = url;
    }
  }

  /// Directory for logs, the cache database and the device id.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vigia"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.incident_timeout(), Duration::from_secs(30));
    assert_eq!(config.api.reference_timeout(), Duration::from_secs(10));
    assert_eq!(config.cache.ttl(), Duration::from_secs(600));
    assert_eq!(config.query.stale_minutes, 5);
    assert_eq!(config.query.retries, 2);
    assert!(config.priority.high_crime_types.contains(&1));
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let config = Config::parse(
      r#"
api:
  url: https://seguranca.example.gov.br/api
priority:
  loss_threshold: 5000
neighborhoods:
  - id: 1
    name: Centro
    zone: Zona Central
"#,
    )
    .unwrap();

    assert_eq!(config.api.url, "https://seguranca.example.gov.br/api");
    assert_eq!(config.api.channel, "notificacoes");
    assert_eq!(config.priority.loss_threshold, 5000.0);
    assert_eq!(config.priority.high_crime_types.len(), 3);
    assert_eq!(config.neighborhoods[0].zone, "Zona Central");
  }

  #[test]
  fn test_env_overrides_endpoints() {
    let mut config = Config::default();
    config.apply_env_overrides(|name| match name {
      "VIGIA_API_URL" => Some("http://10.0.0.5/api".to_string()),
      "VIGIA_REALTIME_URL" => Some(String::new()),
      _ => None,
    });

    assert_eq!(config.api.url, "http://10.0.0.5/api");
    assert_eq!(config.api.realtime_url, ApiConfig::default().realtime_url);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/vigia.yaml"))).is_err());
  }
}
