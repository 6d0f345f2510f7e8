//! Per-query configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FetchError;

type RetryFn = Arc<dyn Fn(u32, &FetchError) -> bool + Send + Sync>;

/// Decides whether a failed fetch is attempted again.
///
/// `failure_count` is the number of failed attempts so far, including the one
/// being judged (so it starts at 1).
#[derive(Clone)]
pub enum RetryPolicy {
  /// Never retry.
  Never,
  /// Retry up to `ceiling` extra attempts, except for errors that cannot
  /// succeed on a second try: 401, timeouts, cancellation and requests
  /// that could not be built.
  Standard { ceiling: u32 },
  /// Caller-supplied decision.
  Custom(RetryFn),
}

impl RetryPolicy {
  pub fn standard(ceiling: u32) -> Self {
    RetryPolicy::Standard { ceiling }
  }

  pub fn custom<F>(decide: F) -> Self
  where
    F: Fn(u32, &FetchError) -> bool + Send + Sync + 'static,
  {
    RetryPolicy::Custom(Arc::new(decide))
  }

  pub fn should_retry(&self, failure_count: u32, error: &FetchError) -> bool {
    if error.is_cancelled() {
      return false;
    }
    match self {
      RetryPolicy::Never => false,
      RetryPolicy::Standard { ceiling } => {
        if error.is_unauthorized()
          || matches!(error, FetchError::Timeout(_) | FetchError::InvalidRequest(_))
        {
          return false;
        }
        failure_count <= *ceiling
      }
      RetryPolicy::Custom(decide) => decide(failure_count, error),
    }
  }
}

impl Default for RetryPolicy {
  fn default() -> Self {
    RetryPolicy::standard(1)
  }
}

impl fmt::Debug for RetryPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RetryPolicy::Never => f.write_str("Never"),
      RetryPolicy::Standard { ceiling } => f.debug_struct("Standard").field("ceiling", ceiling).finish(),
      RetryPolicy::Custom(_) => f.write_str("Custom(..)"),
    }
  }
}

/// Options recognized by [`QueryClient::observe`](super::QueryClient::observe).
#[derive(Debug, Clone)]
pub struct QueryOptions {
  /// How long fetched data counts as fresh
  pub stale_time: Duration,
  /// How long an unobserved entry survives before eviction
  pub gc_time: Duration,
  pub retry: RetryPolicy,
  /// Base delay for exponential backoff between attempts
  pub retry_delay: Duration,
  pub refetch_on_window_focus: bool,
  pub refetch_on_mount: bool,
  /// Gate fetching until a precondition (e.g. a selected id) holds
  pub enabled: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      stale_time: Duration::ZERO,
      gc_time: Duration::from_secs(5 * 60),
      retry: RetryPolicy::default(),
      retry_delay: Duration::from_secs(1),
      refetch_on_window_focus: true,
      refetch_on_mount: true,
      enabled: true,
    }
  }
}

impl QueryOptions {
  /// Longest wait between two attempts.
  pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  pub fn with_enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }

  pub fn with_refetch_on_window_focus(mut self, refetch: bool) -> Self {
    self.refetch_on_window_focus = refetch;
    self
  }

  pub fn with_refetch_on_mount(mut self, refetch: bool) -> Self {
    self.refetch_on_mount = refetch;
    self
  }

  /// Delay before the attempt following failure number `failure_count`.
  pub fn backoff(&self, failure_count: u32) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(16);
    self
      .retry_delay
      .saturating_mul(1u32 << exponent)
      .min(Self::MAX_RETRY_DELAY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_standard_policy_skips_auth_and_timeout() {
    let policy = RetryPolicy::standard(1);
    assert!(!policy.should_retry(1, &FetchError::http(401, "")));
    assert!(!policy.should_retry(1, &FetchError::Timeout(Duration::from_secs(8))));
    assert!(!policy.should_retry(1, &FetchError::Cancelled));
    assert!(!policy.should_retry(1, &FetchError::InvalidRequest("bad path".into())));
    assert!(policy.should_retry(1, &FetchError::http(500, "")));
    assert!(!policy.should_retry(2, &FetchError::http(500, "")));
  }

  #[test]
  fn test_custom_policy_never_retries_cancellation() {
    let policy = RetryPolicy::custom(|_, _| true);
    assert!(policy.should_retry(10, &FetchError::Network("x".into())));
    assert!(!policy.should_retry(1, &FetchError::Cancelled));
  }

  #[test]
  fn test_backoff_is_exponential_and_capped() {
    let options = QueryOptions::default().with_retry_delay(Duration::from_secs(1));
    assert_eq!(options.backoff(1), Duration::from_secs(1));
    assert_eq!(options.backoff(2), Duration::from_secs(2));
    assert_eq!(options.backoff(3), Duration::from_secs(4));
    assert_eq!(options.backoff(20), QueryOptions::MAX_RETRY_DELAY);
  }
}
