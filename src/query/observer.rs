use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::ApiError;

use super::client::{downcast, ErasedFetcher, QueryClient};
use super::key::QueryKey;
use super::QueryState;

/// A live consumer of one cached query.
///
/// Holding an observer keeps the entry from being garbage collected and
/// makes it eligible for invalidation and reconnect refetches. Dropping it
/// releases the entry.
pub struct QueryObserver<T> {
  client: QueryClient,
  key: QueryKey,
  fetcher: ErasedFetcher,
  updates: broadcast::Receiver<QueryKey>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QueryObserver<T> {
  pub(crate) fn new(
    client: QueryClient,
    key: QueryKey,
    fetcher: ErasedFetcher,
    updates: broadcast::Receiver<QueryKey>,
  ) -> Self {
    Self {
      client,
      key,
      fetcher,
      updates,
      _marker: PhantomData,
    }
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Current snapshot of the entry.
  pub fn state(&self) -> QueryState<T> {
    self
      .client
      .get_query_state(&self.key)
      .unwrap_or_else(QueryState::idle)
  }

  /// Cached data if fresh, otherwise wait for a fetch.
  pub async fn fetch(&self) -> Result<Arc<T>, ApiError> {
    let data = self
      .client
      .fetch_erased(&self.key, self.fetcher.clone(), false)
      .await?;
    downcast(&self.key, data)
  }

  /// Fetch regardless of staleness.
  pub async fn refetch(&self) -> Result<Arc<T>, ApiError> {
    let data = self
      .client
      .fetch_erased(&self.key, self.fetcher.clone(), true)
      .await?;
    downcast(&self.key, data)
  }

  /// Wait until this observer's entry settles again.
  ///
  /// Returns `false` once the client is gone and no more updates can come.
  pub async fn changed(&mut self) -> bool {
    loop {
      match self.updates.recv().await {
        Ok(key) if key == self.key => return true,
        Ok(_) => continue,
        // Missed some updates; ours may be among them.
        Err(RecvError::Lagged(_)) => return true,
        Err(RecvError::Closed) => return false,
      }
    }
  }
}

impl<T> Drop for QueryObserver<T> {
  fn drop(&mut self) {
    self.client.release(&self.key);
  }
}

impl<T> std::fmt::Debug for QueryObserver<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryObserver")
      .field("key", &self.key)
      .finish_non_exhaustive()
  }
}
