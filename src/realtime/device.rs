//! Device identity used to tag the push subscription.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DeviceConfig;

const ID_PREFIX: &str = "device_";

/// Viewport widths below these are phones and tablets respectively.
const MOBILE_MAX_WIDTH: u32 = 768;
const TABLET_MAX_WIDTH: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
  Mobile,
  Tablet,
  Web,
  Unknown,
}

impl DeviceKind {
  /// Classify from the user agent first, then the viewport width.
  pub fn classify(viewport_width: Option<u32>, user_agent: Option<&str>) -> Self {
    if let Some(ua) = user_agent.map(str::to_lowercase) {
      if ua.contains("ipad") || ua.contains("tablet") {
        return DeviceKind::Tablet;
      }
      if ua.contains("android") && !ua.contains("mobile") {
        return DeviceKind::Tablet;
      }
      if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        return DeviceKind::Mobile;
      }
    }

    match viewport_width {
      Some(w) if w < MOBILE_MAX_WIDTH => DeviceKind::Mobile,
      Some(w) if w < TABLET_MAX_WIDTH => DeviceKind::Tablet,
      Some(_) => DeviceKind::Web,
      None if user_agent.is_some() => DeviceKind::Web,
      None => DeviceKind::Unknown,
    }
  }
}

impl fmt::Display for DeviceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      DeviceKind::Mobile => "mobile",
      DeviceKind::Tablet => "tablet",
      DeviceKind::Web => "web",
      DeviceKind::Unknown => "unknown",
    })
  }
}

/// Opaque per-installation id plus the classified device kind.
///
/// The id carries no security meaning; it only lets the server route
/// notifications per device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
  pub id: String,
  pub kind: DeviceKind,
}

impl DeviceIdentity {
  /// Read the persisted id, creating and persisting one on first use.
  ///
  /// Storage problems never fail resolution: the id is then only valid for
  /// this process.
  pub fn resolve(path: &Path, config: &DeviceConfig) -> Self {
    let kind = DeviceKind::classify(config.viewport_width, config.user_agent.as_deref());

    match read_id(path) {
      Ok(Some(id)) => {
        debug!(%id, %kind, "device identity loaded");
        return Self { id, kind };
      }
      Ok(None) => {}
      Err(e) => warn!(path = %path.display(), error = %e, "could not read device id"),
    }

    let id = format!("{}{}", ID_PREFIX, uuid::Uuid::new_v4());
    match write_id(path, &id) {
      Ok(()) => debug!(%id, %kind, "device identity created"),
      Err(e) => warn!(path = %path.display(), error = %e, "could not persist device id"),
    }
    Self { id, kind }
  }

  /// Default location of the id file.
  pub fn default_path(config: &DeviceConfig) -> Option<PathBuf> {
    config
      .id_path
      .clone()
      .or_else(|| crate::config::Config::data_dir().ok().map(|d| d.join("device_id")))
  }
}

fn read_id(path: &Path) -> io::Result<Option<String>> {
  match std::fs::read_to_string(path) {
    Ok(contents) => {
      let id = contents.trim();
      Ok((!id.is_empty()).then(|| id.to_string()))
    }
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(e),
  }
}

fn write_id(path: &Path, id: &str) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)?;
  }
  std::fs::write(path, id)
}
