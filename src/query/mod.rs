//! Process-wide query cache with staleness, garbage collection and retries.
//!
//! Inspired by TanStack Query, this module provides a [`QueryClient`] that
//! owns every cached query, keyed by a structural [`QueryKey`].
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::new(QueryConfig::default());
//! let key = QueryKey::new(["patients"]);
//!
//! // Served from the cache while fresh, fetched (once) otherwise.
//! let patients = client
//!   .fetch_query(&key, move || {
//!     let api = api.clone();
//!     async move { api.list_patients(None).await }
//!   })
//!   .await?;
//!
//! // Long-lived consumers hold an observer, which keeps the entry alive
//! // and lets refetch triggers reach it.
//! let mut observer = client.observe(&key, fetcher);
//! while observer.changed().await {
//!   match observer.state().data {
//!     Some(patients) => render(&patients),
//!     None => render_spinner(),
//!   }
//! }
//! ```

mod client;
mod entry;
mod key;
mod mutation;
mod observer;
mod policy;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::api::ApiError;

pub use client::QueryClient;
pub use entry::QueryStatus;
pub use key::{AsQueryKey, KeySegment, QueryKey};
pub use mutation::MutationErrorHook;
pub use observer::QueryObserver;
pub use policy::{QueryConfig, RetryPolicy};

/// Typed snapshot of a cache entry.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
  pub status: QueryStatus,
  /// Last successful payload; kept when a later fetch fails
  pub data: Option<Arc<T>>,
  pub error: Option<ApiError>,
  pub failure_count: u32,
  pub updated_at: Option<DateTime<Utc>>,
  pub is_stale: bool,
}

impl<T> QueryState<T> {
  /// State of a key the cache knows nothing about.
  pub fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      failure_count: 0,
      updated_at: None,
      is_stale: true,
    }
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

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}
