use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::api::ApiError;

/// Type-erased payload stored in the cache.
pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
  /// Created but never fetched
  Idle,
  /// A fetch is in flight (previous data, if any, is still served)
  Loading,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed; previous data, if any, is kept alongside the error
  Error,
}

/// One cached query: its last good payload plus fetch bookkeeping.
#[derive(Clone)]
pub(crate) struct QueryEntry {
  pub data: Option<ErasedData>,
  pub status: QueryStatus,
  pub error: Option<ApiError>,
  pub failure_count: u32,
  /// Wall-clock time of the last successful fetch, for display.
  pub updated_at: Option<DateTime<Utc>>,
  pub stale_at: Option<Instant>,
  pub invalidated: bool,
  pub gc_deadline: Option<Instant>,
}

impl QueryEntry {
  pub fn new() -> Self {
    Self {
      data: None,
      status: QueryStatus::Idle,
      error: None,
      failure_count: 0,
      updated_at: None,
      stale_at: None,
      invalidated: false,
      gc_deadline: None,
    }
  }

  /// Data is stale when missing, invalidated, or past its stale deadline.
  pub fn is_stale(&self, now: Instant) -> bool {
    if self.data.is_none() || self.invalidated {
      return true;
    }
    match self.stale_at {
      Some(stale_at) => now >= stale_at,
      None => true,
    }
  }

  pub fn begin_fetch(&mut self) {
    self.status = QueryStatus::Loading;
  }

  /// Replace the payload as a whole and reset error state.
  pub fn settle_success(&mut self, data: ErasedData, now: Instant, stale_time: Duration) {
    self.data = Some(data);
    self.status = QueryStatus::Success;
    self.error = None;
    self.failure_count = 0;
    self.updated_at = Some(Utc::now());
    self.stale_at = Some(now + stale_time);
    self.invalidated = false;
  }

  /// Record a failure without touching the previous payload.
  pub fn settle_error(&mut self, error: ApiError, failure_count: u32) {
    self.status = QueryStatus::Error;
    self.error = Some(error);
    self.failure_count = failure_count;
  }
}
