use std::time::Duration;

use crate::api::ApiError;

/// Retry and backoff policy for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Retries allowed after the initial attempt.
  pub max_retries: u32,
  /// Delay before the first retry; doubled for each following one.
  pub base_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 3,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(30),
    }
  }
}

impl RetryPolicy {
  pub const fn none() -> Self {
    Self {
      max_retries: 0,
      base_delay: Duration::ZERO,
      max_delay: Duration::ZERO,
    }
  }

  /// Whether a read that has already failed `failure_count` times (not
  /// counting this one) should be tried again after `error`.
  ///
  /// Client errors (`4xx`) are never retried.
  pub fn should_retry(&self, failure_count: u32, error: &ApiError) -> bool {
    match error {
      ApiError::Http { .. } if error.is_client_error() => false,
      _ => failure_count < self.max_retries,
    }
  }

  /// Backoff before retry number `retry_index` (zero based):
  /// `min(base_delay * 2^retry_index, max_delay)`.
  pub fn delay_for(&self, retry_index: u32) -> Duration {
    let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
    self
      .base_delay
      .checked_mul(factor)
      .unwrap_or(self.max_delay)
      .min(self.max_delay)
  }
}

/// Lifecycle policy of a [`QueryClient`](super::QueryClient).
#[derive(Debug, Clone)]
pub struct QueryConfig {
  /// How long fetched data is served without a network call.
  pub stale_time: Duration,
  /// How long an entry without observers survives after its last use.
  pub gc_time: Duration,
  pub retry: RetryPolicy,
  pub refetch_on_reconnect: bool,
  pub refetch_on_window_focus: bool,
}

impl Default for QueryConfig {
  fn default() -> Self {
    Self {
      stale_time: Duration::from_secs(5 * 60),
      gc_time: Duration::from_secs(10 * 60),
      retry: RetryPolicy::default(),
      refetch_on_reconnect: true,
      refetch_on_window_focus: false,
    }
  }
}

impl QueryConfig {
  #[must_use]
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  #[must_use]
  pub fn with_gc_time(mut self, gc_time: Duration) -> Self {
    self.gc_time = gc_time;
    self
  }

  #[must_use]
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  #[must_use]
  pub fn with_refetch_on_window_focus(mut self, enabled: bool) -> Self {
    self.refetch_on_window_focus = enabled;
    self
  }
}
