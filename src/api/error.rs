//! Normalized errors for backend API calls.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("could not reach {url}: {message}")]
  Connect { url: String, message: String },

  #[error("HTTP {status} from {url}: {message}")]
  Status {
    url: String,
    status: StatusCode,
    message: String,
  },

  #[error("invalid response body from {url}: {message}")]
  Decode { url: String, message: String },

  #[error("request failed: {0}")]
  Request(String),
}

impl ApiError {
  /// Normalize a reqwest error into the taxonomy above.
  pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
    let url = url.to_string();
    if e.is_timeout() {
      ApiError::Timeout { url }
    } else if e.is_connect() {
      ApiError::Connect {
        url,
        message: e.to_string(),
      }
    } else if e.is_decode() || e.is_body() {
      ApiError::Decode {
        url,
        message: e.to_string(),
      }
    } else if let Some(status) = e.status() {
      ApiError::Status {
        url,
        status,
        message: e.to_string(),
      }
    } else {
      ApiError::Request(e.to_string())
    }
  }

  /// Whether retrying the same request may succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      ApiError::Timeout { .. } | ApiError::Connect { .. } => true,
      ApiError::Status { status, .. } => {
        status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
      }
      ApiError::Decode { .. } | ApiError::Request(_) => false,
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, ApiError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn status(code: StatusCode) -> ApiError {
    ApiError::Status {
      url: "http://api/ocorrencias/1".to_string(),
      status: code,
      message: String::new(),
    }
  }

  #[test]
  fn test_transient_classification() {
    assert!(ApiError::Timeout { url: "u".into() }.is_transient());
    assert!(status(StatusCode::BAD_GATEWAY).is_transient());
    assert!(status(StatusCode::TOO_MANY_REQUESTS).is_transient());
    assert!(!status(StatusCode::UNPROCESSABLE_ENTITY).is_transient());
    assert!(!ApiError::Request("bad url".into()).is_transient());
  }

  #[test]
  fn test_not_found() {
    assert!(status(StatusCode::NOT_FOUND).is_not_found());
    assert!(!status(StatusCode::GONE).is_not_found());
  }
}
