//! Write path: run a mutation, invalidate what it made stale, or roll back.
//!
//! Every [`Mutation`] is built with an explicit [`Rollback`]. Call sites that
//! change local state before the server confirms (clearing an input, say)
//! undo it there; call sites with nothing to undo pass [`Rollback::none`],
//! so a missing rollback is always a visible choice.
//!
//! Invalidation is not declared per call site: on success the executor
//! consults [`Resource::invalidations`] for the request's target.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use crate::api::{Method, Resource};
use crate::cache::QueryClient;
use crate::error::FetchError;

/// A write to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest<P> {
  pub target: Resource,
  pub payload: P,
  pub method: Method,
}

impl<P> MutationRequest<P> {
  pub fn new(target: Resource, method: Method, payload: P) -> Self {
    Self {
      target,
      payload,
      method,
    }
  }
}

/// Outcome of the most recent `mutate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
  Idle,
  /// Sent, server has not answered
  Pending,
  /// Server confirmed; dependent keys invalidated
  Committed,
  /// Server rejected or unreachable; rollback ran
  RolledBack,
}

type RollbackFn<P> = Arc<dyn Fn(&MutationRequest<P>, &FetchError) + Send + Sync>;

/// Undo for local state changed ahead of server confirmation.
pub struct Rollback<P>(Option<RollbackFn<P>>);

impl<P> Rollback<P> {
  /// Nothing was changed ahead of the server, so nothing to undo.
  pub fn none() -> Self {
    Rollback(None)
  }

  pub fn with<F>(undo: F) -> Self
  where
    F: Fn(&MutationRequest<P>, &FetchError) + Send + Sync + 'static,
  {
    Rollback(Some(Arc::new(undo)))
  }

  fn run(&self, request: &MutationRequest<P>, error: &FetchError) {
    if let Some(undo) = &self.0 {
      undo(request, error);
    }
  }
}

impl<P> Clone for Rollback<P> {
  fn clone(&self) -> Self {
    Rollback(self.0.clone())
  }
}

type MutateFn<P, O> = Arc<dyn Fn(MutationRequest<P>) -> BoxFuture<'static, Result<O, FetchError>> + Send + Sync>;
type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Executes writes against the API and keeps the query cache consistent.
///
/// Concurrent calls are not deduplicated or ordered; callers sequence
/// dependent writes themselves.
pub struct Mutation<P, O> {
  client: QueryClient,
  mutate_fn: MutateFn<P, O>,
  rollback: Rollback<P>,
  on_mutate: Option<Hook<MutationRequest<P>>>,
  on_success: Option<Hook<O>>,
  on_error: Option<Hook<FetchError>>,
  pending: Arc<AtomicUsize>,
  status: Arc<Mutex<MutationStatus>>,
}

impl<P, O> Clone for Mutation<P, O> {
  fn clone(&self) -> Self {
    Self {
      client: self.client.clone(),
      mutate_fn: self.mutate_fn.clone(),
      rollback: self.rollback.clone(),
      on_mutate: self.on_mutate.clone(),
      on_success: self.on_success.clone(),
      on_error: self.on_error.clone(),
      pending: self.pending.clone(),
      status: self.status.clone(),
    }
  }
}

impl<P, O> Mutation<P, O> {
  pub fn is_pending(&self) -> bool {
    self.pending.load(Ordering::SeqCst) > 0
  }

  pub fn status(&self) -> MutationStatus {
    *self.status.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_status(&self, status: MutationStatus) {
    *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
  }
}

impl<P, O> Mutation<P, O>
where
  P: Clone + Send + Sync + 'static,
  O: Send + 'static,
{
  pub fn new<F, Fut>(client: QueryClient, mutate_fn: F, rollback: Rollback<P>) -> Self
  where
    F: Fn(MutationRequest<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, FetchError>> + Send + 'static,
  {
    Self {
      client,
      mutate_fn: Arc::new(move |request| mutate_fn(request).boxed()),
      rollback,
      on_mutate: None,
      on_success: None,
      on_error: None,
      pending: Arc::new(AtomicUsize::new(0)),
      status: Arc::new(Mutex::new(MutationStatus::Idle)),
    }
  }

  /// Runs before the request is sent, e.g. to apply an optimistic change.
  pub fn on_mutate<F>(mut self, hook: F) -> Self
  where
    F: Fn(&MutationRequest<P>) + Send + Sync + 'static,
  {
    self.on_mutate = Some(Arc::new(hook));
    self
  }

  /// Runs after dependent keys were invalidated.
  pub fn on_success<F>(mut self, hook: F) -> Self
  where
    F: Fn(&O) + Send + Sync + 'static,
  {
    self.on_success = Some(Arc::new(hook));
    self
  }

  /// Runs after the rollback.
  pub fn on_error<F>(mut self, hook: F) -> Self
  where
    F: Fn(&FetchError) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(hook));
    self
  }

  /// Send the write once. On success the target's dependent keys are
  /// invalidated before `on_success` runs.
  ///
  /// Dropping the returned future before it completes counts as a failure
  /// with [`FetchError::Cancelled`]: the rollback and `on_error` still run.
  pub async fn mutate(&self, request: MutationRequest<P>) -> Result<O, FetchError> {
    self.pending.fetch_add(1, Ordering::SeqCst);
    let mut guard = PendingGuard {
      mutation: self,
      request: &request,
      finished: false,
    };
    self.set_status(MutationStatus::Pending);
    if let Some(hook) = &self.on_mutate {
      hook(&request);
    }
    debug!(target = ?request.target, method = ?request.method, "mutation started");

    let result = (self.mutate_fn)(request.clone()).await;
    guard.finished = true;
    drop(guard);

    match result {
      Ok(output) => {
        for matcher in request.target.invalidations(request.method) {
          self.client.invalidate(&matcher);
        }
        if let Some(hook) = &self.on_success {
          hook(&output);
        }
        self.set_status(MutationStatus::Committed);
        Ok(output)
      }
      Err(error) => {
        warn!(target = ?request.target, method = ?request.method, %error, "mutation failed");
        self.rollback.run(&request, &error);
        if let Some(hook) = &self.on_error {
          hook(&error);
        }
        self.set_status(MutationStatus::RolledBack);
        Err(error)
      }
    }
  }
}

/// Releases the pending count of one `mutate` call, rolling back if the
/// call was abandoned mid-flight.
struct PendingGuard<'a, P, O> {
  mutation: &'a Mutation<P, O>,
  request: &'a MutationRequest<P>,
  finished: bool,
}

impl<P, O> Drop for PendingGuard<'_, P, O> {
  fn drop(&mut self) {
    let mutation = self.mutation;
    mutation.pending.fetch_sub(1, Ordering::SeqCst);
    if self.finished {
      return;
    }
    let error = FetchError::Cancelled;
    warn!(target = ?self.request.target, method = ?self.request.method, "mutation abandoned before completion");
    mutation.rollback.run(self.request, &error);
    if let Some(hook) = &mutation.on_error {
      hook(&error);
    }
    mutation.set_status(MutationStatus::RolledBack);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::keys;
  use crate::cache::{FetchContext, QueryOptions, QueryStatus};
  use std::sync::atomic::AtomicU32;
  use std::time::Duration;

  fn observe_counter(
    client: &QueryClient,
    key: crate::cache::CacheKey,
    calls: &Arc<AtomicU32>,
  ) -> crate::cache::QueryObserver<u32> {
    let calls = calls.clone();
    client.observe(
      key,
      move |_ctx: FetchContext| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          tokio::time::sleep(Duration::from_millis(20)).await;
          Ok(n)
        }
      },
      QueryOptions::default().with_stale_time(Duration::from_secs(60)),
    )
  }

  #[tokio::test(start_paused = true)]
  async fn test_send_message_invalidates_list_and_thread() {
    let client = QueryClient::new();
    let list_calls = Arc::new(AtomicU32::new(0));
    let thread_calls = Arc::new(AtomicU32::new(0));
    let other_calls = Arc::new(AtomicU32::new(0));

    let mut list = observe_counter(&client, keys::conversations(), &list_calls);
    let mut thread = observe_counter(&client, keys::messages(7), &thread_calls);
    let mut other = observe_counter(&client, keys::messages(8), &other_calls);
    list.settled().await;
    thread.settled().await;
    other.settled().await;

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = statuses.clone();
    let hook_client = client.clone();
    let mutation = Mutation::new(
      client.clone(),
      |request: MutationRequest<String>| async move { Ok(request.payload.len()) },
      Rollback::none(),
    )
    .on_success(move |_| {
      let mut seen = seen.lock().unwrap();
      seen.push(hook_client.status(&keys::conversations()));
      seen.push(hook_client.status(&keys::messages(7)));
    });

    let sent = mutation
      .mutate(MutationRequest::new(
        Resource::Message { conversation_id: 7 },
        Method::Create,
        "hola".to_string(),
      ))
      .await
      .unwrap();
    assert_eq!(sent, 4);
    assert_eq!(mutation.status(), MutationStatus::Committed);

    assert_eq!(
      *statuses.lock().unwrap(),
      vec![Some(QueryStatus::Loading), Some(QueryStatus::Loading)]
    );
    assert_eq!(client.status(&keys::messages(8)), Some(QueryStatus::Success));

    list.settled().await;
    thread.settled().await;
    assert_eq!(list_calls.load(Ordering::SeqCst), 2);
    assert_eq!(thread_calls.load(Ordering::SeqCst), 2);
    assert_eq!(other_calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_rolls_back_without_invalidating() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut list = observe_counter(&client, keys::conversations(), &calls);
    list.settled().await;

    let draft = Arc::new(Mutex::new("hola".to_string()));
    let errors = Arc::new(AtomicU32::new(0));

    let optimistic = draft.clone();
    let restore = draft.clone();
    let error_count = errors.clone();
    let mutation = Mutation::new(
      client.clone(),
      |_request: MutationRequest<String>| async { Err::<(), _>(FetchError::http(500, "boom")) },
      Rollback::with(move |request: &MutationRequest<String>, _err| {
        *restore.lock().unwrap() = request.payload.clone();
      }),
    )
    .on_mutate(move |_| optimistic.lock().unwrap().clear())
    .on_error(move |_| {
      error_count.fetch_add(1, Ordering::SeqCst);
    });

    let err = mutation
      .mutate(MutationRequest::new(
        Resource::Message { conversation_id: 7 },
        Method::Create,
        "hola".to_string(),
      ))
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(*draft.lock().unwrap(), "hola");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(mutation.status(), MutationStatus::RolledBack);
    assert!(!mutation.is_pending());
    assert_eq!(client.status(&keys::conversations()), Some(QueryStatus::Success));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_each_call_runs_once_and_tracks_pending() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let mutation = Mutation::new(
      client,
      move |request: MutationRequest<u64>| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok(request.payload)
        }
      },
      Rollback::none(),
    );

    let first = mutation.mutate(MutationRequest::new(Resource::User { id: 1 }, Method::Update, 1));
    let second = mutation.mutate(MutationRequest::new(Resource::User { id: 1 }, Method::Update, 2));
    let mid_flight = async {
      tokio::time::sleep(Duration::from_millis(10)).await;
      mutation.is_pending()
    };

    let (a, b, pending) = tokio::join!(first, second, mid_flight);
    assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    assert!(pending);
    assert!(!mutation.is_pending());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_abandoned_call_rolls_back() {
    let client = QueryClient::new();
    let draft = Arc::new(Mutex::new("hola".to_string()));
    let errors = Arc::new(Mutex::new(Vec::new()));

    let optimistic = draft.clone();
    let restore = draft.clone();
    let seen = errors.clone();
    let mutation = Mutation::new(
      client,
      |_request: MutationRequest<String>| async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(())
      },
      Rollback::with(move |request: &MutationRequest<String>, _err| {
        *restore.lock().unwrap() = request.payload.clone();
      }),
    )
    .on_mutate(move |_| optimistic.lock().unwrap().clear())
    .on_error(move |err| seen.lock().unwrap().push(err.clone()));

    let request = MutationRequest::new(
      Resource::Message { conversation_id: 7 },
      Method::Create,
      "hola".to_string(),
    );
    let outcome = tokio::time::timeout(Duration::from_secs(1), mutation.mutate(request)).await;

    assert!(outcome.is_err());
    assert!(!mutation.is_pending());
    assert_eq!(mutation.status(), MutationStatus::RolledBack);
    assert_eq!(*draft.lock().unwrap(), "hola");
    assert!(matches!(errors.lock().unwrap().as_slice(), [FetchError::Cancelled]));
  }
}
