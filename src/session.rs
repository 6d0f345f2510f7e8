//! Who is signed in.
//!
//! The API is asked first. The last user it confirmed is persisted, so the
//! app keeps a session while the API cannot be reached; a 401 ends it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::keys;
use crate::api::types::User;
use crate::api::CachedNaturClient;
use crate::cache::{KeyMatch, QueryStatus};
use crate::error::FetchError;
use crate::storage::SnapshotStore;

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
  /// Confirmed by the API just now
  Authenticated(User),
  /// API unreachable; last confirmed user from storage
  Offline { user: User, cached_at: DateTime<Utc> },
  Anonymous,
}

impl AuthState {
  pub fn user(&self) -> Option<&User> {
    match self {
      AuthState::Authenticated(user) | AuthState::Offline { user, .. } => Some(user),
      AuthState::Anonymous => None,
    }
  }

  pub fn is_offline(&self) -> bool {
    matches!(self, AuthState::Offline { .. })
  }
}

/// Errors that mean "the API could not be reached", as opposed to the API
/// answering with a refusal.
fn is_unreachable(error: &FetchError) -> bool {
  match error {
    FetchError::Network(_) | FetchError::Timeout(_) => true,
    FetchError::Http { status, .. } => *status >= 500,
    FetchError::Cancelled | FetchError::Parse(_) | FetchError::InvalidRequest(_) => false,
  }
}

pub struct Session<S> {
  client: CachedNaturClient,
  store: Arc<S>,
}

impl<S> Clone for Session<S> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      store: self.store.clone(),
    }
  }
}

impl<S: SnapshotStore> Session<S> {
  pub fn new(client: CachedNaturClient, store: Arc<S>) -> Self {
    Self { client, store }
  }

  /// Resolve the current user through the cached `auth/me` query.
  ///
  /// Storage failures are logged and never fail the session.
  pub async fn resolve(&self) -> Result<AuthState, FetchError> {
    let mut me = self.client.me();
    let state = me.settled().await;

    match state.status {
      QueryStatus::Success => {
        let Some(user) = state.data else {
          return Ok(AuthState::Anonymous);
        };
        if let Err(e) = self.store.save(&keys::me(), user.as_ref()) {
          warn!(error = %e, "failed to persist current user");
        }
        Ok(AuthState::Authenticated(user.as_ref().clone()))
      }
      QueryStatus::Error => {
        let error = state.error.unwrap_or(FetchError::Cancelled);
        if error.is_unauthorized() {
          info!("session rejected by the API");
          self.forget();
          return Ok(AuthState::Anonymous);
        }
        if is_unreachable(&error) {
          if let Some(state) = self.offline() {
            warn!(%error, "API unreachable, using stored session");
            return Ok(state);
          }
        }
        Err(error)
      }
      QueryStatus::Idle | QueryStatus::Loading => Err(FetchError::Cancelled),
    }
  }

  /// Last user the API confirmed, without asking the API.
  pub fn stored_user(&self) -> Option<(User, DateTime<Utc>)> {
    match self.store.load::<User>(&keys::me()) {
      Ok(stored) => stored.map(|s| (s.value, s.cached_at)),
      Err(e) => {
        warn!(error = %e, "failed to read stored user");
        None
      }
    }
  }

  fn offline(&self) -> Option<AuthState> {
    self
      .stored_user()
      .map(|(user, cached_at)| AuthState::Offline { user, cached_at })
  }

  /// Drop the stored user and the cached `auth/me` entry.
  pub fn forget(&self) {
    if let Err(e) = self.store.remove(&keys::me()) {
      warn!(error = %e, "failed to clear stored user");
    }
    self.client.cache().remove(&KeyMatch::Exact(keys::me()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::NaturApi;
  use crate::cache::{QueryClient, QueryOptions, RetryPolicy};
  use crate::http::HttpClient;
  use crate::storage::SqliteStore;
  use httpmock::MockServer;
  use std::time::Duration;

  const ANA: &str = r#"{"user": {"id": 3, "name": "Ana", "email": "ana@example.com"}}"#;

  fn session(base_url: &str, store: Arc<SqliteStore>) -> Session<SqliteStore> {
    let api = NaturApi::new(HttpClient::new(base_url).unwrap());
    let options = QueryOptions::default()
      .with_retry(RetryPolicy::Never)
      .with_retry_delay(Duration::from_millis(1));
    Session::new(CachedNaturClient::new(api, QueryClient::new(), options), store)
  }

  fn ana() -> User {
    User {
      id: 3,
      name: "Ana".to_string(),
      email: "ana@example.com".to_string(),
      role: None,
      avatar_url: None,
      bio: None,
      phone: None,
      website: None,
      company_id: None,
    }
  }

  #[tokio::test]
  async fn test_confirmed_user_is_persisted() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method("GET").path("/api/auth/me");
        then.status(200).body(ANA);
      })
      .await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let state = session(&server.base_url(), store.clone()).resolve().await.unwrap();
    assert_eq!(state, AuthState::Authenticated(ana()));
    assert_eq!(store.load::<User>(&keys::me()).unwrap().unwrap().value, ana());
  }

  #[tokio::test]
  async fn test_unreachable_api_falls_back_to_stored_user() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.save(&keys::me(), &ana()).unwrap();

    let state = session("http://127.0.0.1:1", store).resolve().await.unwrap();
    assert!(state.is_offline());
    assert_eq!(state.user(), Some(&ana()));
  }

  #[tokio::test]
  async fn test_unreachable_without_stored_user_is_an_error() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let err = session("http://127.0.0.1:1", store).resolve().await.unwrap_err();
    assert!(matches!(err, FetchError::Network(_)));
  }

  #[tokio::test]
  async fn test_unauthorized_clears_stored_user() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.path("/api/auth/me");
        then.status(401).body(r#"{"message": "No autorizado"}"#);
      })
      .await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.save(&keys::me(), &ana()).unwrap();

    let session = session(&server.base_url(), store.clone());
    assert_eq!(session.resolve().await.unwrap(), AuthState::Anonymous);
    assert!(store.load::<User>(&keys::me()).unwrap().is_none());
    assert!(session.stored_user().is_none());
  }

  #[test]
  fn test_only_transport_failures_count_as_unreachable() {
    assert!(is_unreachable(&FetchError::Network("refused".into())));
    assert!(is_unreachable(&FetchError::Timeout(Duration::from_secs(8))));
    assert!(is_unreachable(&FetchError::http(502, "")));
    assert!(!is_unreachable(&FetchError::http(404, "")));
    assert!(!is_unreachable(&FetchError::InvalidRequest("bad path".into())));
    assert!(!is_unreachable(&FetchError::Parse("eof".into())));
  }

  #[tokio::test]
  async fn test_server_error_serves_stored_user() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.path("/api/auth/me");
        then.status(503).body("maintenance");
      })
      .await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.save(&keys::me(), &ana()).unwrap();

    let state = session(&server.base_url(), store).resolve().await.unwrap();
    assert!(matches!(state, AuthState::Offline { ref user, .. } if *user == ana()));
  }
}
