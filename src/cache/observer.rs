//! A view's subscription to one cache key.

use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;

use super::client::QueryClient;
use super::key::CacheKey;
use super::state::{QueryState, Snapshot};
use crate::error::FetchError;

/// Live handle on a cached query.
///
/// Reading never blocks: `state()` returns whatever the entry holds right
/// now. Event-loop style consumers call [`poll`](Self::poll) each tick; async
/// consumers await [`changed`](Self::changed) or [`settled`](Self::settled).
///
/// Dropping the observer detaches it; the last detach starts the entry's GC
/// timer.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: CacheKey,
  /// Entry this observer is counted in
  entry_id: u64,
  rx: watch::Receiver<Snapshot>,
  enabled: bool,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub(crate) fn new(
    client: QueryClient,
    key: CacheKey,
    entry_id: u64,
    rx: watch::Receiver<Snapshot>,
    enabled: bool,
  ) -> Self {
    Self {
      client,
      key,
      entry_id,
      rx,
      enabled,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn state(&self) -> QueryState<T> {
    self.rx.borrow().typed()
  }

  pub fn data(&self) -> Option<Arc<T>> {
    self.state().data
  }

  pub fn error(&self) -> Option<FetchError> {
    self.rx.borrow().error.clone()
  }

  pub fn is_loading(&self) -> bool {
    self.state().is_loading()
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Returns `true` if the entry changed since the last call.
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    match self.rx.has_changed() {
      Ok(true) => {
        let _ = self.rx.borrow_and_update();
        true
      }
      _ => false,
    }
  }

  /// Wait for the next change. Returns `false` if the entry was removed.
  pub async fn changed(&mut self) -> bool {
    self.rx.changed().await.is_ok()
  }

  /// Wait until no fetch is in flight and return the resulting state.
  pub async fn settled(&mut self) -> QueryState<T> {
    loop {
      let state: QueryState<T> = self.rx.borrow_and_update().typed();
      if !state.is_loading() {
        return state;
      }
      if self.rx.changed().await.is_err() {
        return self.state();
      }
    }
  }

  /// Open or close the gate on fetching. Enabling may fetch right away.
  pub fn set_enabled(&mut self, enabled: bool) {
    if self.enabled == enabled {
      return;
    }
    self.enabled = enabled;
    self.client.set_observer_enabled(&self.key, self.entry_id, enabled);
  }

  /// Force a new fetch, replacing one in flight.
  pub fn refetch(&self) -> bool {
    self.client.refetch(&self.key)
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.client.detach(&self.key, self.entry_id, self.enabled);
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .field("status", &self.rx.borrow().status)
      .field("enabled", &self.enabled)
      .finish_non_exhaustive()
  }
}
