//! Observable state of a cache entry.

use std::any::Any;
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::FetchError;

/// Type-erased cached value. Observers downcast it to their data type.
pub(crate) type AnyData = Arc<dyn Any + Send + Sync>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched (or fetch gated by `enabled = false`)
  Idle,
  /// A fetch is in flight; `data` may still hold the previous value
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed after retries were exhausted
  Error,
}

/// Erased snapshot broadcast to every observer of one key.
#[derive(Clone)]
pub(crate) struct Snapshot {
  pub status: QueryStatus,
  pub data: Option<AnyData>,
  pub error: Option<FetchError>,
  pub updated_at: Option<Instant>,
}

impl Snapshot {
  pub fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      updated_at: None,
    }
  }

  pub fn typed<T: Send + Sync + 'static>(&self) -> QueryState<T> {
    let data = self.data.clone().and_then(|d| d.downcast::<T>().ok());
    QueryState {
      status: self.status,
      data,
      error: self.error.clone(),
      updated_at: self.updated_at,
    }
  }
}

/// What a view sees when it reads a query.
#[derive(Debug)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  /// Last successful value, kept through later failures and refetches
  pub data: Option<Arc<T>>,
  pub error: Option<FetchError>,
  /// When `data` was last written
  pub updated_at: Option<Instant>,
}

impl<T> Clone for QueryState<T> {
  fn clone(&self) -> Self {
    Self {
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      updated_at: self.updated_at,
    }
  }
}

impl<T> QueryState<T> {
  pub fn is_idle(&self) -> bool {
    self.status == QueryStatus::Idle
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  /// True while the first value is still on its way.
  pub fn is_initial_loading(&self) -> bool {
    self.is_loading() && self.data.is_none()
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&FetchError> {
    self.error.as_ref()
  }
}
