//! Headless view models for the dashboard screens.
//!
//! A view owns its cache observers and any local state (search boxes,
//! drafts, forms). The front-end calls [`View::tick`] on every frame and
//! reads the view's accessors; nothing here draws.

use crate::cache::{CacheKey, QueryState};
use crate::error::FetchError;

mod chat;
mod directory;
mod map;
mod profile;

pub use chat::ChatView;
pub use directory::DirectoryView;
pub use map::{MapView, Marker};
pub use profile::{ProfileEditor, ProfileForm};

/// How a failed fetch or write is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
  /// Send the user to sign in
  NotAuthenticated,
  /// Show a "try again" affordance
  Retryable(String),
  /// Show the message; retrying will not help
  Fatal(String),
}

impl From<&FetchError> for ViewError {
  fn from(error: &FetchError) -> Self {
    if error.is_unauthorized() {
      return ViewError::NotAuthenticated;
    }
    match error {
      FetchError::Timeout(_) | FetchError::Cancelled => ViewError::Retryable(error.to_string()),
      e if e.is_transient() => ViewError::Retryable(error.to_string()),
      _ => ViewError::Fatal(error.to_string()),
    }
  }
}

impl std::fmt::Display for ViewError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ViewError::NotAuthenticated => write!(f, "not signed in"),
      ViewError::Retryable(msg) => write!(f, "{} (retry)", msg),
      ViewError::Fatal(msg) => write!(f, "{}", msg),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewStatus {
  /// The view will not fetch (e.g. missing configuration)
  Disabled,
  /// Nothing to show yet
  Loading,
  Ready,
  /// Nothing to show, and the last fetch failed
  Failed(ViewError),
}

impl ViewStatus {
  /// Cached data wins over an error: a failed refetch keeps the view ready.
  pub fn of<T>(state: &QueryState<T>) -> Self {
    if state.data.is_some() {
      return ViewStatus::Ready;
    }
    match (&state.error, state.is_loading() || state.is_idle()) {
      (Some(error), false) => ViewStatus::Failed(error.into()),
      (None, false) => ViewStatus::Ready,
      (_, true) => ViewStatus::Loading,
    }
  }
}

/// Common surface of every screen.
pub trait View {
  /// Title for the header / breadcrumb
  fn label(&self) -> String;

  /// Cache keys this view currently reads.
  fn keys(&self) -> Vec<CacheKey>;

  fn status(&self) -> ViewStatus;

  /// Poll observers; returns true if anything changed since the last tick.
  fn tick(&mut self) -> bool {
    false
  }

  /// Force the view's queries to refetch.
  fn refresh(&mut self) {}
}
