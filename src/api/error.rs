//! Error type returned by the API client and surfaced through the query cache.

use serde::Deserialize;
use thiserror::Error;

/// Failure of a single API call.
///
/// The variants are matched on by the query cache to decide whether a read
/// is retried, so every failure the client can produce maps onto exactly one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// The server answered with a non-2xx status.
  #[error("{message}")]
  Http {
    status: u16,
    status_text: String,
    message: String,
  },

  /// No response was obtained at all (DNS, refused connection, reset).
  #[error("Network error: {0}")]
  Network(String),

  /// A 2xx body that could not be decoded into the expected type.
  #[error("Failed to decode response: {0}")]
  Decode(String),

  /// Anything else, e.g. a cached payload of an unexpected type.
  #[error("{0}")]
  Unexpected(String),
}

/// Error body shape sent by the server. Both fields are optional and any
/// other fields are ignored.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
  message: Option<String>,
  error: Option<String>,
}

impl ApiError {
  /// Build a structured HTTP error from the parts of a failed response.
  ///
  /// The body is parsed leniently: an empty or malformed body degrades to the
  /// synthesized `HTTP {status}: {status_text}` message.
  pub fn from_response(status: u16, status_text: &str, body: &[u8]) -> Self {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();

    let non_empty = |m: &String| !m.is_empty();
    let message = parsed
      .message
      .filter(non_empty)
      .or_else(|| parsed.error.filter(non_empty))
      .unwrap_or_else(|| format!("HTTP {}: {}", status, status_text));

    ApiError::Http {
      status,
      status_text: status_text.to_string(),
      message,
    }
  }

  /// HTTP status of a structured error, `None` for every other kind.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// True for structured errors with a status in `[400, 500)`.
  pub fn is_client_error(&self) -> bool {
    matches!(self.status(), Some(400..=499))
  }

  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}
