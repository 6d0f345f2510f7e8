//! Error taxonomy shared by the HTTP wrapper, the query cache and mutations.

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single fetch or write.
///
/// Errors are `Clone` so one failure can be broadcast to every observer of a
/// cache entry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// Transport failure (DNS, connection refused, reset).
  #[error("network error: {0}")]
  Network(String),

  /// Client-side deadline exceeded.
  #[error("request timed out after {0:?}")]
  Timeout(Duration),

  /// The request was aborted through its cancellation signal.
  #[error("request was cancelled")]
  Cancelled,

  /// Server answered with a non-2xx status.
  #[error("server responded with status {status}: {body}")]
  Http { status: u16, body: String },

  /// The body was not JSON, or did not match the expected schema.
  #[error("failed to parse response: {0}")]
  Parse(String),

  /// The request could not be built (bad path, unencodable body). Nothing
  /// was sent.
  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

impl FetchError {
  pub fn http(status: u16, body: impl Into<String>) -> Self {
    Self::Http {
      status,
      body: body.into(),
    }
  }

  /// HTTP status of the failure, if the server responded.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// 401 takes the "not authenticated" path instead of an error banner.
  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }

  /// Whether another attempt could plausibly succeed.
  ///
  /// Timeouts are treated as final, matching how the dashboard never retried
  /// an aborted request.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Network(_) => true,
      Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
      Self::Timeout(_) | Self::Cancelled | Self::Parse(_) | Self::InvalidRequest(_) => false,
    }
  }

  /// Per-field validation messages carried by a 400/422 response.
  ///
  /// Two body shapes are understood:
  /// - `{"errors": {"email": "already taken"}}` (values may also be arrays)
  /// - `{"errors": [{"field": "email", "message": "already taken"}]}`
  pub fn field_errors(&self) -> Option<FieldErrors> {
    let Self::Http { status, body } = self else {
      return None;
    };
    if *status != 400 && *status != 422 {
      return None;
    }

    let value: Value = serde_json::from_str(body).ok()?;
    let errors = value.get("errors")?;
    let mut fields = FieldErrors::default();

    match errors {
      Value::Object(map) => {
        for (field, message) in map {
          match message {
            Value::String(s) => fields.insert(field, s),
            Value::Array(items) => {
              if let Some(first) = items.iter().find_map(Value::as_str) {
                fields.insert(field, first);
              }
            }
            _ => {}
          }
        }
      }
      Value::Array(items) => {
        for item in items {
          let field = item.get("field").and_then(Value::as_str);
          let message = item.get("message").and_then(Value::as_str);
          if let (Some(field), Some(message)) = (field, message) {
            fields.insert(field, message);
          }
        }
      }
      _ => {}
    }

    (!fields.is_empty()).then_some(fields)
  }
}

/// Validation messages keyed by form field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
  pub fn insert(&mut self, field: impl Into<String>, message: impl Into<String>) {
    self.0.insert(field.into(), message.into());
  }

  pub fn get(&self, field: &str) -> Option<&str> {
    self.0.get(field).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }
}
