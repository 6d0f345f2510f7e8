//! The query cache: keyed entries, deduplicated fetches, staleness and GC.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::key::{CacheKey, KeyMatch};
use super::observer::QueryObserver;
use super::options::QueryOptions;
use super::state::{AnyData, QueryStatus, Snapshot};
use crate::error::FetchError;

type FetchFn = Arc<dyn Fn(FetchContext) -> BoxFuture<'static, Result<AnyData, FetchError>> + Send + Sync>;

/// Handed to the fetch function on every attempt.
#[derive(Debug, Clone)]
pub struct FetchContext {
  pub key: CacheKey,
  /// Cancelled when the fetch is superseded, cancelled or its entry evicted.
  /// Pass it to the HTTP wrapper so the network call is aborted too.
  pub signal: CancellationToken,
  /// 1 for the first attempt, 2 for the first retry, ...
  pub attempt: u32,
}

struct InFlight {
  seq: u64,
  cancel: CancellationToken,
  /// Status to restore if this fetch is cancelled
  prior: QueryStatus,
}

struct Entry {
  /// Distinguishes this entry from earlier ones removed under the same key
  id: u64,
  tx: watch::Sender<Snapshot>,
  options: QueryOptions,
  fetcher: Option<FetchFn>,
  /// Attached observers, enabled or not; zero starts the GC timer
  observers: usize,
  /// Attached observers with `enabled = true`
  active: usize,
  invalidated: bool,
  in_flight: Option<InFlight>,
  gc_generation: u64,
}

impl Entry {
  fn new(id: u64, options: QueryOptions) -> Self {
    let (tx, _) = watch::channel(Snapshot::idle());
    Self {
      id,
      tx,
      options,
      fetcher: None,
      observers: 0,
      active: 0,
      invalidated: false,
      in_flight: None,
      gc_generation: 0,
    }
  }

  fn status(&self) -> QueryStatus {
    self.tx.borrow().status
  }

  fn is_stale(&self, now: Instant) -> bool {
    if self.invalidated {
      return true;
    }
    match self.tx.borrow().updated_at {
      Some(at) => now.saturating_duration_since(at) >= self.options.stale_time,
      None => true,
    }
  }

  /// Whether an observer attaching now should trigger a fetch.
  fn wants_fetch_on_mount(&self, now: Instant) -> bool {
    if self.in_flight.is_some() {
      return false;
    }
    let has_data = self.tx.borrow().data.is_some();
    if !has_data {
      return true;
    }
    self.options.refetch_on_mount && self.is_stale(now)
  }
}

struct Inner {
  entries: Mutex<HashMap<CacheKey, Entry>>,
  next_seq: AtomicU64,
  next_entry: AtomicU64,
}

impl Inner {
  fn next_entry_id(&self) -> u64 {
    self.next_entry.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    // Entries stay consistent across a panicking holder: every mutation is a
    // single assignment or send.
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// Process-wide query cache, constructed once and handed to every view.
///
/// Cloning is cheap; all clones share the same entries.
///
/// Fetches run as tokio tasks, so methods that may start a fetch must be
/// called from within a tokio runtime.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryClient {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        next_seq: AtomicU64::new(0),
        next_entry: AtomicU64::new(0),
      }),
    }
  }

  fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
    weak.upgrade().map(|inner| Self { inner })
  }

  /// Subscribe to `key`, fetching through `fetch` when the cache has no
  /// usable value.
  ///
  /// Observers of the same key share one entry and one in-flight fetch. The
  /// observer detaches when dropped.
  pub fn observe<T, F, Fut>(&self, key: CacheKey, fetch: F, options: QueryOptions) -> QueryObserver<T>
  where
    T: Send + Sync + 'static,
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let fetcher: FetchFn = Arc::new(move |ctx| {
      let fut = fetch(ctx);
      async move { fut.await.map(|value| Arc::new(value) as AnyData) }.boxed()
    });
    let enabled = options.enabled;

    let (entry_id, rx) = {
      let mut entries = self.inner.lock();
      let entry = entries
        .entry(key.clone())
        .or_insert_with(|| Entry::new(self.inner.next_entry_id(), options.clone()));

      entry.options = options;
      entry.fetcher = Some(fetcher);
      entry.observers += 1;
      // Any pending GC timer is now obsolete
      entry.gc_generation += 1;
      let rx = entry.tx.subscribe();

      if enabled {
        entry.active += 1;
        if entry.wants_fetch_on_mount(Instant::now()) {
          self.start_fetch(&key, entry);
        } else {
          trace!(%key, "observer attached, serving cache");
        }
      }
      (entry.id, rx)
    };

    QueryObserver::new(self.clone(), key, entry_id, rx, enabled)
  }

  /// Resolve `key` to a value, serving fresh cached data without a fetch.
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: CacheKey,
    fetch: F,
    options: QueryOptions,
  ) -> Result<Arc<T>, FetchError>
  where
    T: Send + Sync + 'static,
    F: Fn(FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
  {
    let mut observer = self.observe(key, fetch, options.with_enabled(true));
    let state = observer.settled().await;
    match state.status {
      QueryStatus::Success => state.data.ok_or_else(|| {
        FetchError::Parse(format!("cached value for {} has a different type", observer.key()))
      }),
      QueryStatus::Error => Err(state.error.unwrap_or(FetchError::Cancelled)),
      QueryStatus::Idle | QueryStatus::Loading => Err(FetchError::Cancelled),
    }
  }

  /// Current value under `key`, if any and of type `T`.
  pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &CacheKey) -> Option<Arc<T>> {
    let entries = self.inner.lock();
    let data = entries.get(key)?.tx.borrow().data.clone()?;
    data.downcast::<T>().ok()
  }

  /// Write a value directly, as if a fetch had just succeeded.
  pub fn set_query_data<T: Send + Sync + 'static>(&self, key: CacheKey, data: T) {
    let mut entries = self.inner.lock();
    let is_new = !entries.contains_key(&key);
    let entry = entries
      .entry(key.clone())
      .or_insert_with(|| Entry::new(self.inner.next_entry_id(), QueryOptions::default()));

    entry.invalidated = false;
    let data: AnyData = Arc::new(data);
    entry.tx.send_modify(|s| {
      s.data = Some(data);
      s.error = None;
      s.updated_at = Some(Instant::now());
      if s.status != QueryStatus::Loading {
        s.status = QueryStatus::Success;
      }
    });

    if is_new {
      entry.gc_generation += 1;
      let (id, generation, gc_time) = (entry.id, entry.gc_generation, entry.options.gc_time);
      self.schedule_gc(key, id, generation, gc_time);
    }
  }

  /// Mark matching entries stale and refetch those currently observed.
  ///
  /// A fetch already in flight for an observed key is cancelled and
  /// replaced, so the refetch reflects the write that caused the
  /// invalidation. Returns the number of entries marked.
  pub fn invalidate(&self, matcher: &KeyMatch) -> usize {
    let mut entries = self.inner.lock();
    let mut marked = 0;
    for (key, entry) in entries.iter_mut().filter(|(k, _)| matcher.matches(k)) {
      entry.invalidated = true;
      marked += 1;
      if entry.active > 0 {
        self.start_fetch(key, entry);
      }
    }
    debug!(key = %matcher.key(), marked, "invalidated queries");
    marked
  }

  /// Start a fresh fetch for `key`, replacing any fetch in flight.
  /// Returns false when nothing is registered under the key.
  pub fn refetch(&self, key: &CacheKey) -> bool {
    let mut entries = self.inner.lock();
    match entries.get_mut(key) {
      Some(entry) if entry.fetcher.is_some() => {
        self.start_fetch(key, entry);
        true
      }
      _ => false,
    }
  }

  /// Window regained focus: refetch stale observed queries that opted in.
  pub fn focus(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.inner.lock();
    let mut started = 0;
    for (key, entry) in entries.iter_mut() {
      if entry.active > 0
        && entry.options.refetch_on_window_focus
        && entry.in_flight.is_none()
        && entry.is_stale(now)
      {
        self.start_fetch(key, entry);
        started += 1;
      }
    }
    started
  }

  /// Abort the in-flight fetch for `key`. The entry keeps its previous value
  /// and returns to the status it had before the fetch began.
  pub fn cancel(&self, key: &CacheKey) -> bool {
    let mut entries = self.inner.lock();
    let Some(entry) = entries.get_mut(key) else {
      return false;
    };
    let Some(in_flight) = entry.in_flight.take() else {
      return false;
    };
    in_flight.cancel.cancel();
    entry.tx.send_modify(|s| s.status = in_flight.prior);
    debug!(%key, "fetch cancelled");
    true
  }

  /// Drop matching entries immediately, cancelling their fetches.
  pub fn remove(&self, matcher: &KeyMatch) -> usize {
    let mut entries = self.inner.lock();
    let before = entries.len();
    entries.retain(|key, entry| {
      let keep = !matcher.matches(key);
      if !keep {
        if let Some(in_flight) = entry.in_flight.take() {
          in_flight.cancel.cancel();
        }
      }
      keep
    });
    before - entries.len()
  }

  pub fn status(&self, key: &CacheKey) -> Option<QueryStatus> {
    self.inner.lock().get(key).map(Entry::status)
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.inner.lock().contains_key(key)
  }

  pub fn is_invalidated(&self, key: &CacheKey) -> bool {
    self.inner.lock().get(key).is_some_and(|e| e.invalidated)
  }

  pub fn observer_count(&self, key: &CacheKey) -> usize {
    self.inner.lock().get(key).map_or(0, |e| e.observers)
  }

  /// Number of fetches currently in flight.
  pub fn is_fetching(&self) -> usize {
    self
      .inner
      .lock()
      .values()
      .filter(|e| e.in_flight.is_some())
      .count()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().is_empty()
  }

  /// Entries replaced since the observer attached are left alone.
  pub(crate) fn set_observer_enabled(&self, key: &CacheKey, entry_id: u64, enabled: bool) {
    let mut entries = self.inner.lock();
    let Some(entry) = entries.get_mut(key).filter(|e| e.id == entry_id) else {
      return;
    };
    if enabled {
      entry.active += 1;
      if entry.wants_fetch_on_mount(Instant::now()) {
        self.start_fetch(key, entry);
      }
    } else {
      entry.active = entry.active.saturating_sub(1);
    }
  }

  pub(crate) fn detach(&self, key: &CacheKey, entry_id: u64, enabled: bool) {
    let mut entries = self.inner.lock();
    let Some(entry) = entries.get_mut(key).filter(|e| e.id == entry_id) else {
      trace!(%key, "observer outlived its entry");
      return;
    };
    entry.observers = entry.observers.saturating_sub(1);
    if enabled {
      entry.active = entry.active.saturating_sub(1);
    }
    if entry.observers > 0 {
      return;
    }

    entry.gc_generation += 1;
    let (generation, gc_time) = (entry.gc_generation, entry.options.gc_time);
    trace!(%key, ?gc_time, "last observer detached");
    self.schedule_gc(key.clone(), entry_id, generation, gc_time);
  }

  fn schedule_gc(&self, key: CacheKey, entry_id: u64, generation: u64, gc_time: Duration) {
    if gc_time == Duration::MAX {
      return;
    }
    // Observers dropped after the runtime shut down have nothing to collect
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return;
    };
    let weak = Arc::downgrade(&self.inner);
    handle.spawn(async move {
      tokio::time::sleep(gc_time).await;
      if let Some(client) = QueryClient::from_weak(&weak) {
        client.collect(&key, entry_id, generation);
      }
    });
  }

  fn collect(&self, key: &CacheKey, entry_id: u64, generation: u64) {
    let mut entries = self.inner.lock();
    let expired = entries
      .get(key)
      .is_some_and(|e| e.id == entry_id && e.observers == 0 && e.gc_generation == generation);
    if expired {
      if let Some(in_flight) = entries.remove(key).and_then(|mut e| e.in_flight.take()) {
        in_flight.cancel.cancel();
      }
      debug!(%key, "evicted unobserved query");
    }
  }

  /// Issue a fetch for `entry`, cancelling any fetch it already has.
  /// Caller holds the entries lock.
  fn start_fetch(&self, key: &CacheKey, entry: &mut Entry) {
    let Some(fetcher) = entry.fetcher.clone() else {
      return;
    };

    let prior = match entry.in_flight.take() {
      Some(previous) => {
        previous.cancel.cancel();
        debug!(%key, superseded = previous.seq, "replacing in-flight fetch");
        previous.prior
      }
      None => entry.status(),
    };

    let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
    let cancel = CancellationToken::new();
    entry.in_flight = Some(InFlight {
      seq,
      cancel: cancel.clone(),
      prior,
    });
    entry.tx.send_modify(|s| s.status = QueryStatus::Loading);
    debug!(%key, seq, "fetch started");

    let options = entry.options.clone();
    let weak = Arc::downgrade(&self.inner);
    let key = key.clone();
    tokio::spawn(async move {
      let outcome = run_attempts(&key, fetcher, &options, &cancel).await;
      if let Some(client) = QueryClient::from_weak(&weak) {
        client.settle(&key, seq, outcome);
      }
    });
  }

  /// Apply a finished fetch if it is still the latest issued for `key`.
  /// `None` means the fetch was aborted and must not write.
  fn settle(&self, key: &CacheKey, seq: u64, outcome: Option<Result<AnyData, FetchError>>) {
    let mut entries = self.inner.lock();
    let Some(entry) = entries.get_mut(key) else {
      trace!(%key, seq, "entry evicted before fetch settled");
      return;
    };
    if entry.in_flight.as_ref().map(|f| f.seq) != Some(seq) {
      debug!(%key, seq, "discarding out-of-order response");
      return;
    }
    let Some(in_flight) = entry.in_flight.take() else {
      return;
    };

    match outcome {
      None => {
        entry.tx.send_modify(|s| s.status = in_flight.prior);
      }
      Some(Ok(data)) => {
        entry.invalidated = false;
        entry.tx.send_modify(|s| {
          s.status = QueryStatus::Success;
          s.data = Some(data);
          s.error = None;
          s.updated_at = Some(Instant::now());
        });
        debug!(%key, seq, "fetch succeeded");
      }
      Some(Err(error)) => {
        warn!(%key, seq, %error, "fetch failed");
        entry.tx.send_modify(|s| {
          s.status = QueryStatus::Error;
          s.error = Some(error);
        });
      }
    }
  }
}

/// Run the fetch function, retrying per the entry's policy.
async fn run_attempts(
  key: &CacheKey,
  fetcher: FetchFn,
  options: &QueryOptions,
  cancel: &CancellationToken,
) -> Option<Result<AnyData, FetchError>> {
  let mut failures = 0u32;
  loop {
    let ctx = FetchContext {
      key: key.clone(),
      signal: cancel.child_token(),
      attempt: failures + 1,
    };

    let result = tokio::select! {
      biased;
      _ = cancel.cancelled() => return None,
      result = fetcher(ctx) => result,
    };

    match result {
      Ok(data) => return Some(Ok(data)),
      Err(FetchError::Cancelled) => return None,
      Err(error) => {
        failures += 1;
        if !options.retry.should_retry(failures, &error) {
          return Some(Err(error));
        }
        let delay = options.backoff(failures);
        debug!(%key, failures, ?delay, %error, "retrying fetch");
        tokio::select! {
          biased;
          _ = cancel.cancelled() => return None,
          _ = tokio::time::sleep(delay) => {}
        }
      }
    }
  }
}
