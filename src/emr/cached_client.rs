//! Cached EMR client that routes reads through the query cache.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::api::ApiError;
use crate::query::{AsQueryKey, QueryClient, QueryObserver};

use super::client::EmrClient;
use super::keys::EmrQueryKey;
use super::types::{Entity, FieldPatch};

/// EMR client with transparent caching support.
///
/// Reads are served from the [`QueryClient`] while fresh. Writes run once
/// through [`QueryClient::mutate`] and, when they succeed, invalidate every
/// cached query of the written resource.
#[derive(Clone)]
pub struct CachedEmrClient {
  inner: EmrClient,
  cache: QueryClient,
}

impl CachedEmrClient {
  pub fn new(inner: EmrClient, cache: QueryClient) -> Self {
    Self { inner, cache }
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  pub fn inner(&self) -> &EmrClient {
    &self.inner
  }

  /// List records, optionally only those of one patient.
  pub async fn list<E: Entity>(
    &self,
    animal_number: Option<&str>,
  ) -> Result<Arc<Vec<E>>, ApiError> {
    let query_key = EmrQueryKey::list(E::RESOURCE, animal_number);
    debug!(query = %query_key.description(), "list");
    self
      .cache
      .fetch_query(&query_key.query_key(), self.list_fetcher::<E>(animal_number))
      .await
  }

  /// Keep a listing cached and refreshed for as long as the observer lives.
  pub fn observe_list<E: Entity>(&self, animal_number: Option<&str>) -> QueryObserver<Vec<E>> {
    let query_key = EmrQueryKey::list(E::RESOURCE, animal_number);
    debug!(query = %query_key.description(), "observe");
    self
      .cache
      .observe(&query_key.query_key(), self.list_fetcher::<E>(animal_number))
  }

  /// Get one record. Patients are looked up by animal number.
  pub async fn get<E: Entity>(&self, id: &str) -> Result<Arc<E>, ApiError> {
    let query_key = EmrQueryKey::detail(E::RESOURCE, id);
    debug!(query = %query_key.description(), "get");

    let inner = self.inner.clone();
    let id = id.to_string();
    self
      .cache
      .fetch_query(&query_key.query_key(), move || {
        let inner = inner.clone();
        let id = id.clone();
        async move { inner.get::<E>(E::RESOURCE, &id).await }
      })
      .await
  }

  pub async fn create<E: Entity>(&self, new: &E::New) -> Result<E, ApiError> {
    let created = self
      .cache
      .mutate(self.inner.create::<E, _>(E::RESOURCE, new))
      .await?;
    self.invalidate::<E>();
    Ok(created)
  }

  pub async fn update<E: Entity>(&self, id: &str, patch: &FieldPatch) -> Result<E, ApiError> {
    let updated = self
      .cache
      .mutate(self.inner.update::<E>(E::RESOURCE, id, patch))
      .await?;
    self.invalidate::<E>();
    Ok(updated)
  }

  pub async fn delete<E: Entity>(&self, id: &str) -> Result<(), ApiError> {
    self
      .cache
      .mutate(self.inner.delete(E::RESOURCE, id))
      .await?;
    self.invalidate::<E>();
    Ok(())
  }

  fn list_fetcher<E: Entity>(
    &self,
    animal_number: Option<&str>,
  ) -> impl Fn() -> BoxFuture<'static, Result<Vec<E>, ApiError>> + Send + Sync + 'static {
    let inner = self.inner.clone();
    let scope = animal_number
      .filter(|_| E::RESOURCE.is_patient_scoped())
      .map(String::from);
    move || {
      let inner = inner.clone();
      let scope = scope.clone();
      async move { inner.list::<E>(E::RESOURCE, scope.as_deref()).await }.boxed()
    }
  }

  fn invalidate<E: Entity>(&self) {
    let root = EmrQueryKey::root(E::RESOURCE);
    let marked = self.cache.invalidate_queries(&root);
    debug!(resource = E::RESOURCE.path(), marked, "invalidated after write");
  }
}
