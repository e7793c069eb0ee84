//! The query cache manager.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::api::ApiError;

use super::entry::{ErasedData, QueryEntry};
use super::key::QueryKey;
use super::mutation::{self, MutationErrorHook};
use super::observer::QueryObserver;
use super::policy::{QueryConfig, RetryPolicy};
use super::QueryState;

type ErasedFuture = BoxFuture<'static, Result<ErasedData, ApiError>>;

/// Fetcher with its output type erased, so entries of every payload type
/// live in one map.
pub(crate) type ErasedFetcher = Arc<dyn Fn() -> ErasedFuture + Send + Sync>;

type SharedFetch = Shared<ErasedFuture>;

struct InFlight {
  id: u64,
  future: SharedFetch,
  /// Set when the key is invalidated while this fetch runs; its result is
  /// then stored but still counts as stale.
  invalidated: bool,
}

struct Slot {
  entry: QueryEntry,
  fetcher: Option<ErasedFetcher>,
  in_flight: Option<InFlight>,
  observers: usize,
  /// Token of the GC timer watching this slot, if one is armed
  gc_timer: Option<u64>,
}

impl Slot {
  fn new() -> Self {
    Self {
      entry: QueryEntry::new(),
      fetcher: None,
      in_flight: None,
      observers: 0,
      gc_timer: None,
    }
  }
}

struct Inner {
  config: QueryConfig,
  slots: Mutex<HashMap<QueryKey, Slot>>,
  updates: broadcast::Sender<QueryKey>,
  next_fetch_id: AtomicU64,
  next_gc_timer: AtomicU64,
  on_mutation_error: MutationErrorHook,
}

/// Process-wide cache of query results.
///
/// Cloning is cheap and every clone shares the same cache. Tests and
/// independent sessions build their own instance with [`QueryClient::new`].
///
/// The cache lock is never held across an `.await`: every operation runs to
/// completion between network suspension points. Fetches are spawned on the
/// current tokio runtime, so methods that may start one need a runtime.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("config", &self.inner.config)
      .field("entries", &self.len())
      .finish_non_exhaustive()
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new(QueryConfig::default())
  }
}

impl QueryClient {
  pub fn new(config: QueryConfig) -> Self {
    Self::with_mutation_error_hook(config, mutation::log_mutation_error())
  }

  pub fn with_mutation_error_hook(config: QueryConfig, hook: MutationErrorHook) -> Self {
    let (updates, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Inner {
        config,
        slots: Mutex::new(HashMap::new()),
        updates,
        next_fetch_id: AtomicU64::new(1),
        next_gc_timer: AtomicU64::new(1),
        on_mutation_error: hook,
      }),
    }
  }

  pub fn config(&self) -> &QueryConfig {
    &self.inner.config
  }

  /// Drop every entry. In-flight fetches finish but their results are
  /// discarded.
  pub fn reset(&self) {
    let removed = {
      let mut slots = self.inner.lock();
      let n = slots.len();
      slots.clear();
      n
    };
    debug!(removed, "query cache reset");
  }

  /// Return fresh cached data for `key`, or fetch it.
  ///
  /// Concurrent calls for a key that is already being fetched wait for that
  /// fetch instead of starting another one. Reads are retried according to
  /// the configured [`RetryPolicy`].
  pub async fn fetch_query<T, F, Fut>(
    &self,
    key: &QueryKey,
    fetcher: F,
  ) -> Result<Arc<T>, ApiError>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let data = self.fetch_erased(key, erase(fetcher), false).await?;
    downcast(key, data)
  }

  /// Register a long-lived consumer of `key`.
  ///
  /// While the returned observer is alive the entry is never garbage
  /// collected and refetch triggers may refresh it. A background fetch is
  /// started if the entry is missing or stale.
  pub fn observe<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> QueryObserver<T>
  where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let fetcher = erase(fetcher);
    let updates = self.inner.updates.subscribe();
    let now = Instant::now();

    {
      let mut slots = self.inner.lock();
      let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
      slot.observers += 1;
      slot.entry.gc_deadline = None;
      slot.fetcher = Some(fetcher.clone());

      if slot.entry.is_stale(now) && slot.in_flight.is_none() {
        debug!(key = %key, "observer attached to stale entry, fetching");
        Inner::start_fetch(&self.inner, key, slot, fetcher.clone());
      }
    }

    QueryObserver::new(self.clone(), key.clone(), fetcher, updates)
  }

  /// Fetch `key` again with its registered fetcher, ignoring staleness.
  pub async fn refetch(&self, key: &QueryKey) -> Result<(), ApiError> {
    let fetcher = {
      let slots = self.inner.lock();
      slots.get(key).and_then(|slot| slot.fetcher.clone())
    };
    let fetcher = fetcher
      .ok_or_else(|| ApiError::Unexpected(format!("No fetcher registered for query {}", key)))?;
    self.fetch_erased(key, fetcher, true).await.map(|_| ())
  }

  pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
    let data = {
      let slots = self.inner.lock();
      slots.get(key)?.entry.data.clone()?
    };
    data.downcast::<T>().ok()
  }

  pub fn get_query_state<T: Send + Sync + 'static>(
    &self,
    key: &QueryKey,
  ) -> Option<QueryState<T>> {
    let now = Instant::now();
    let slots = self.inner.lock();
    let entry = &slots.get(key)?.entry;

    Some(QueryState {
      status: entry.status,
      data: entry.data.clone().and_then(|d| d.downcast::<T>().ok()),
      error: entry.error.clone(),
      failure_count: entry.failure_count,
      updated_at: entry.updated_at,
      is_stale: entry.is_stale(now),
    })
  }

  /// Store `data` for `key` as if it had just been fetched.
  pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, data: T) {
    let now = Instant::now();
    {
      let mut slots = self.inner.lock();
      let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
      slot
        .entry
        .settle_success(Arc::new(data), now, self.inner.config.stale_time);
      if slot.observers == 0 && slot.in_flight.is_none() {
        self.inner.schedule_gc(key, slot, now);
      }
    }
    self.inner.notify(key);
  }

  /// Mark every entry under `prefix` stale. Entries with observers are
  /// refetched right away; the rest refetch on their next read.
  ///
  /// Returns the number of entries invalidated.
  pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
    let mut slots = self.inner.lock();
    let mut invalidated = 0;

    for (key, slot) in slots.iter_mut().filter(|(k, _)| k.starts_with(prefix)) {
      invalidated += 1;
      slot.entry.invalidated = true;

      if let Some(in_flight) = slot.in_flight.as_mut() {
        in_flight.invalidated = true;
        continue;
      }
      if slot.observers > 0 {
        if let Some(fetcher) = slot.fetcher.clone() {
          Inner::start_fetch(&self.inner, key, slot, fetcher);
        }
      }
    }

    debug!(prefix = %prefix, invalidated, "invalidated queries");
    invalidated
  }

  /// Remove every entry under `prefix`. Returns the number removed.
  pub fn remove_queries(&self, prefix: &QueryKey) -> usize {
    let mut slots = self.inner.lock();
    let before = slots.len();
    slots.retain(|key, _| !key.starts_with(prefix));
    before - slots.len()
  }

  /// Run a write once. A failure is reported to the mutation error hook and
  /// then returned; it is never retried.
  pub async fn mutate<T, Fut>(&self, mutation: Fut) -> Result<T, ApiError>
  where
    Fut: Future<Output = Result<T, ApiError>>,
  {
    match mutation.await {
      Ok(value) => Ok(value),
      Err(err) => {
        mutation::report(&self.inner.on_mutation_error, &err);
        Err(err)
      }
    }
  }

  /// Network came back: refetch stale entries that have observers.
  /// Returns the number of fetches started.
  pub fn on_reconnect(&self) -> usize {
    if !self.inner.config.refetch_on_reconnect {
      return 0;
    }
    let started = self.inner.refetch_observed_stale();
    debug!(started, "refetch on reconnect");
    started
  }

  /// The consumer regained focus. Refetches nothing unless
  /// `refetch_on_window_focus` is enabled.
  pub fn on_window_focus(&self) -> usize {
    if !self.inner.config.refetch_on_window_focus {
      debug!("window focus ignored");
      return 0;
    }
    self.inner.refetch_observed_stale()
  }

  /// Receive the key of every entry that settles from now on.
  pub fn updates(&self) -> broadcast::Receiver<QueryKey> {
    self.inner.updates.subscribe()
  }

  pub fn contains(&self, key: &QueryKey) -> bool {
    self.inner.lock().contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub(crate) async fn fetch_erased(
    &self,
    key: &QueryKey,
    fetcher: ErasedFetcher,
    force: bool,
  ) -> Result<ErasedData, ApiError> {
    let pending = {
      let now = Instant::now();
      let mut slots = self.inner.lock();
      let slot = slots.entry(key.clone()).or_insert_with(Slot::new);
      slot.fetcher = Some(fetcher.clone());

      if !force && !slot.entry.is_stale(now) {
        if let Some(data) = slot.entry.data.clone() {
          debug!(key = %key, "cache hit");
          if slot.observers == 0 && slot.in_flight.is_none() {
            self.inner.schedule_gc(key, slot, now);
          }
          return Ok(data);
        }
      }

      match &slot.in_flight {
        Some(in_flight) => {
          debug!(key = %key, "joining in-flight fetch");
          in_flight.future.clone()
        }
        None => {
          debug!(key = %key, fingerprint = %key.fingerprint(), "cache miss, fetching");
          Inner::start_fetch(&self.inner, key, slot, fetcher)
        }
      }
    };

    pending.await
  }

  /// Drop one observer of `key`; the last one out schedules GC.
  pub(crate) fn release(&self, key: &QueryKey) {
    let mut slots = self.inner.lock();
    if let Some(slot) = slots.get_mut(key) {
      slot.observers = slot.observers.saturating_sub(1);
      if slot.observers == 0 && slot.in_flight.is_none() {
        self.inner.schedule_gc(key, slot, Instant::now());
      }
    }
  }
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn notify(&self, key: &QueryKey) {
    // No receivers is fine.
    let _ = self.updates.send(key.clone());
  }

  /// Spawn a fetch for `key` and record it as the slot's in-flight fetch.
  /// The fetch runs to completion even if every waiter goes away.
  fn start_fetch(
    this: &Arc<Self>,
    key: &QueryKey,
    slot: &mut Slot,
    fetcher: ErasedFetcher,
  ) -> SharedFetch {
    let id = this.next_fetch_id.fetch_add(1, Ordering::Relaxed);
    let weak: Weak<Inner> = Arc::downgrade(this);
    let retry = this.config.retry;
    let fetch_key = key.clone();

    let future: ErasedFuture = async move {
      let (result, failures) = run_with_retry(&fetch_key, fetcher, retry).await;
      if let Some(inner) = weak.upgrade() {
        inner.settle(&fetch_key, id, &result, failures);
      }
      result
    }
    .boxed();
    let shared = future.shared();

    slot.entry.begin_fetch();
    slot.entry.gc_deadline = None;
    slot.in_flight = Some(InFlight {
      id,
      future: shared.clone(),
      invalidated: false,
    });

    tokio::spawn(shared.clone());
    shared
  }

  fn settle(
    self: &Arc<Self>,
    key: &QueryKey,
    id: u64,
    result: &Result<ErasedData, ApiError>,
    failures: u32,
  ) {
    let now = Instant::now();
    {
      let mut slots = self.lock();
      let Some(slot) = slots.get_mut(key) else {
        debug!(key = %key, "entry removed while fetching, result dropped");
        return;
      };
      let invalidated_while_fetching = match &slot.in_flight {
        Some(in_flight) if in_flight.id == id => in_flight.invalidated,
        _ => return,
      };
      slot.in_flight = None;

      match result {
        Ok(data) => {
          slot
            .entry
            .settle_success(data.clone(), now, self.config.stale_time);
          slot.entry.invalidated = invalidated_while_fetching;
          debug!(key = %key, "query settled");
        }
        Err(err) => {
          slot.entry.settle_error(err.clone(), failures);
          debug!(key = %key, error = %err, failures, "query failed");
        }
      }

      if slot.observers == 0 {
        self.schedule_gc(key, slot, now);
      } else if invalidated_while_fetching {
        if let Some(fetcher) = slot.fetcher.clone() {
          Inner::start_fetch(self, key, slot, fetcher);
        }
      }
    }
    self.notify(key);
  }

  /// Push the GC deadline of an unobserved entry to `now + gc_time`.
  ///
  /// Each slot has at most one timer. An armed timer picks up the new
  /// deadline when it wakes, so only the first call spawns a task.
  fn schedule_gc(self: &Arc<Self>, key: &QueryKey, slot: &mut Slot, now: Instant) {
    let deadline = now + self.config.gc_time;
    slot.entry.gc_deadline = Some(deadline);
    if slot.gc_timer.is_some() {
      return;
    }

    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return;
    };
    let token = self.next_gc_timer.fetch_add(1, Ordering::Relaxed);
    slot.gc_timer = Some(token);

    let weak = Arc::downgrade(self);
    let key = key.clone();
    handle.spawn(async move {
      let mut deadline = deadline;
      loop {
        tokio::time::sleep_until(deadline).await;
        let Some(inner) = weak.upgrade() else {
          return;
        };
        match inner.collect(&key, token) {
          Some(next) => deadline = next,
          None => return,
        }
      }
    });
  }

  /// Evict `key` if its GC deadline has passed. Returns the deadline to wait
  /// for when it has moved, or `None` once the timer is done.
  fn collect(&self, key: &QueryKey, token: u64) -> Option<Instant> {
    let now = Instant::now();
    let mut slots = self.lock();
    let slot = slots.get_mut(key)?;
    if slot.gc_timer != Some(token) {
      return None;
    }

    let idle = slot.observers == 0 && slot.in_flight.is_none();
    let deadline = match slot.entry.gc_deadline {
      Some(deadline) if idle => deadline,
      _ => {
        slot.gc_timer = None;
        return None;
      }
    };
    if now < deadline {
      return Some(deadline);
    }

    slots.remove(key);
    debug!(key = %key, "evicted unused query");
    None
  }

  fn refetch_observed_stale(self: &Arc<Self>) -> usize {
    let now = Instant::now();
    let mut slots = self.lock();
    let mut started = 0;

    for (key, slot) in slots.iter_mut() {
      if slot.observers == 0 || slot.in_flight.is_some() || !slot.entry.is_stale(now) {
        continue;
      }
      if let Some(fetcher) = slot.fetcher.clone() {
        Inner::start_fetch(self, key, slot, fetcher);
        started += 1;
      }
    }
    started
  }
}

/// Call `fetcher` until it succeeds or the policy gives up. Returns the
/// result together with the number of failed attempts.
///
/// A panicking fetcher settles the query as a failed attempt and is not
/// retried.
async fn run_with_retry(
  key: &QueryKey,
  fetcher: ErasedFetcher,
  policy: RetryPolicy,
) -> (Result<ErasedData, ApiError>, u32) {
  let mut failures = 0u32;
  loop {
    let attempt = AssertUnwindSafe(async { fetcher().await }).catch_unwind().await;
    let result = match attempt {
      Ok(result) => result,
      Err(_) => {
        error!(key = %key, "query fetcher panicked");
        let err = ApiError::Unexpected(format!("Fetcher for query {} panicked", key));
        return (Err(err), failures + 1);
      }
    };

    match result {
      Ok(data) => return (Ok(data), failures),
      Err(err) => {
        if !policy.should_retry(failures, &err) {
          return (Err(err), failures + 1);
        }
        let delay = policy.delay_for(failures);
        failures += 1;
        warn!(key = %key, attempt = failures, ?delay, error = %err, "query failed, retrying");
        tokio::time::sleep(delay).await;
      }
    }
  }
}

pub(crate) fn erase<T, F, Fut>(fetcher: F) -> ErasedFetcher
where
  T: Send + Sync + 'static,
  F: Fn() -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  Arc::new(move || {
    let fut = fetcher();
    async move { fut.await.map(|data| Arc::new(data) as ErasedData) }.boxed()
  })
}

pub(crate) fn downcast<T: Send + Sync + 'static>(
  key: &QueryKey,
  data: ErasedData,
) -> Result<Arc<T>, ApiError> {
  data.downcast::<T>().map_err(|_| {
    ApiError::Unexpected(format!(
      "Cached value for {} is not a {}",
      key,
      std::any::type_name::<T>()
    ))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::time::Duration;

  fn counting<T: Clone + Send + Sync + 'static>(
    calls: &Arc<AtomicUsize>,
    value: T,
  ) -> impl Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      calls.fetch_add(1, Ordering::SeqCst);
      let value = value.clone();
      async move { Ok(value) }.boxed()
    }
  }

  /// Fetcher that answers from a script, one response per call.
  fn scripted(
    calls: &Arc<AtomicUsize>,
    script: Vec<Result<u32, ApiError>>,
  ) -> impl Fn() -> BoxFuture<'static, Result<u32, ApiError>> + Send + Sync + 'static {
    let calls = calls.clone();
    let script = Arc::new(script);
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst);
      let response = script[n.min(script.len() - 1)].clone();
      async move { response }.boxed()
    }
  }

  fn http(status: u16) -> ApiError {
    ApiError::from_response(status, "", b"")
  }

  fn key(segments: &[&str]) -> QueryKey {
    QueryKey::new(segments.iter().copied())
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_data_is_served_from_cache() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    let first = client.fetch_query(&k, counting(&calls, vec!["A001"])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(4 * 60)).await;
    let second = client.fetch_query(&k, counting(&calls, vec!["A001"])).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_data_is_refetched_once() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_client_error_is_not_retried() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients", "A999"]);

    let err = client
      .fetch_query(&k, scripted(&calls, vec![Err(http(404))]))
      .await
      .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.status(), Some(404));

    let state = client.get_query_state::<u32>(&k).unwrap();
    assert!(state.is_error());
    assert_eq!(state.error().and_then(ApiError::status), Some(404));
  }

  #[tokio::test(start_paused = true)]
  async fn test_server_error_is_retried_after_backoff() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["visits"]);
    let started = Instant::now();

    let data = client
      .fetch_query(&k, scripted(&calls, vec![Err(http(500)), Ok(2)]))
      .await
      .unwrap();

    assert_eq!(*data, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));

    let state = client.get_query_state::<u32>(&k).unwrap();
    assert!(state.is_success());
    assert_eq!(state.data(), Some(&2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_retries_give_up_after_limit() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["visits"]);
    let started = Instant::now();

    let err = client
      .fetch_query(&k, scripted(&calls, vec![Err(ApiError::Network("refused".into()))]))
      .await
      .unwrap_err();

    assert!(err.is_network());
    // initial attempt plus three retries, waiting 1s + 2s + 4s
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() >= Duration::from_secs(7));
    assert_eq!(client.get_query_state::<u32>(&k).unwrap().failure_count, 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_requests_are_coalesced() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["examMaster"]);

    let slow = {
      let calls = calls.clone();
      move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
          tokio::time::sleep(Duration::from_millis(100)).await;
          Ok::<_, ApiError>(vec![1u32, 2, 3])
        }
      }
    };

    let (a, b) = tokio::join!(
      client.fetch_query(&k, slow.clone()),
      client.fetch_query(&k, slow)
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_unobserved_entry_is_collected() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["clusters"]);

    client.fetch_query(&k, counting(&calls, 0u8)).await.unwrap();
    assert!(client.contains(&k));

    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    assert!(!client.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_use_pushes_back_collection() {
    let config = QueryConfig::default().with_stale_time(Duration::from_secs(3600));
    let client = QueryClient::new(config);
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["filters"]);

    client.fetch_query(&k, counting(&calls, 0u8)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(8 * 60)).await;
    client.fetch_query(&k, counting(&calls, 0u8)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(8 * 60)).await;

    assert!(client.contains(&k));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_repeated_hits_share_one_gc_timer() {
    let config = QueryConfig::default().with_stale_time(Duration::from_secs(3600));
    let client = QueryClient::new(config);
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["examMaster"]);

    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    tokio::task::yield_now().await;
    let metrics = tokio::runtime::Handle::current().metrics();
    let before = metrics.num_alive_tasks();

    for _ in 0..1000 {
      client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    }
    assert!(metrics.num_alive_tasks() <= before);

    // The single timer still follows the latest use
    tokio::time::sleep(Duration::from_secs(9 * 60)).await;
    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(9 * 60)).await;
    assert!(client.contains(&k));

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(!client.contains(&k));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_panicking_fetcher_settles_as_error() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["questionnaire", "responses"]);

    let fails_once = {
      let calls = calls.clone();
      move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            panic!("malformed questionnaire payload");
          }
          Ok::<_, ApiError>(3u32)
        }
        .boxed()
      }
    };

    let err = client.fetch_query(&k, fails_once.clone()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unexpected(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(client.get_query_state::<u32>(&k).unwrap().is_error());

    let data = client.fetch_query(&k, fails_once).await.unwrap();
    assert_eq!(*data, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Once unused the entry is collected like any other
    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    assert!(!client.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_observed_entry_is_kept() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["medications"]);

    let mut observer = client.observe(&k, counting(&calls, 5u32));
    assert!(observer.changed().await);
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert!(client.contains(&k));

    drop(observer);
    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    assert!(!client.contains(&k));
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_keeps_previous_data() {
    let client = QueryClient::new(QueryConfig::default().with_stale_time(Duration::ZERO));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["testResults"]);

    client
      .fetch_query(&k, scripted(&calls, vec![Ok(10), Err(http(403))]))
      .await
      .unwrap();
    let fetcher = scripted(&calls, vec![Ok(10), Err(http(403))]);
    let err = client.fetch_query(&k, fetcher).await.unwrap_err();

    assert_eq!(err.status(), Some(403));
    let state = client.get_query_state::<u32>(&k).unwrap();
    assert!(state.is_error());
    assert_eq!(state.data(), Some(&10));
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_marks_prefix_stale() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let root = key(&["visits"]);
    let scoped = key(&["visits", "patient", "A001"]);
    let other = key(&["patients"]);

    client.fetch_query(&root, counting(&calls, 1u32)).await.unwrap();
    client.fetch_query(&scoped, counting(&calls, 2u32)).await.unwrap();
    client.fetch_query(&other, counting(&calls, 3u32)).await.unwrap();

    assert_eq!(client.invalidate_queries(&root), 2);
    assert!(client.get_query_state::<u32>(&scoped).unwrap().is_stale);
    assert!(!client.get_query_state::<u32>(&other).unwrap().is_stale);

    client.fetch_query(&scoped, counting(&calls, 2u32)).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_refetches_observed_entries() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["visits", "patient", "A001"]);

    let mut observer = client.observe(&k, counting(&calls, 1u32));
    assert!(observer.changed().await);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    client.invalidate_queries(&key(&["visits"]));
    assert!(observer.changed().await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(observer.state().is_success());
  }

  /// Fetcher numbering its responses, each taking 100ms.
  fn slow_counting(
    calls: &Arc<AtomicUsize>,
  ) -> impl Fn() -> BoxFuture<'static, Result<u32, ApiError>> + Send + Sync + 'static {
    let calls = calls.clone();
    move || {
      let n = calls.fetch_add(1, Ordering::SeqCst) as u32 + 1;
      async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(n)
      }
      .boxed()
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidation_during_fetch_refetches_observed_once() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["visits", "patient", "A001"]);

    let mut observer = client.observe(&k, slow_counting(&calls));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.invalidate_queries(&key(&["visits"])), 1);

    // The in-flight result is stored but already stale, and a second fetch
    // has started.
    assert!(observer.changed().await);
    let state = observer.state();
    assert_eq!(state.data(), Some(&1));
    assert!(state.is_stale);
    assert!(state.is_loading());

    assert!(observer.changed().await);
    let state = observer.state();
    assert_eq!(state.data(), Some(&2));
    assert!(!state.is_stale);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidation_during_fetch_leaves_unobserved_entry_stale() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["testResults"]);

    let invalidate = async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      client.invalidate_queries(&k)
    };
    let (data, invalidated) =
      tokio::join!(client.fetch_query(&k, slow_counting(&calls)), invalidate);

    assert_eq!(*data.unwrap(), 1);
    assert_eq!(invalidated, 1);
    assert!(client.get_query_state::<u32>(&k).unwrap().is_stale);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(*client.fetch_query(&k, slow_counting(&calls)).await.unwrap(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_focus_is_ignored_and_reconnect_refetches() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    let mut observer = client.observe(&k, counting(&calls, 1u32));
    assert!(observer.changed().await);

    // still fresh
    assert_eq!(client.on_reconnect(), 0);

    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert_eq!(client.on_window_focus(), 0);
    assert_eq!(client.on_reconnect(), 1);
    assert!(observer.changed().await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_focus_refetch_when_enabled() {
    let client = QueryClient::new(QueryConfig::default().with_refetch_on_window_focus(true));
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    let mut observer = client.observe(&k, counting(&calls, 1u32));
    assert!(observer.changed().await);
    tokio::time::sleep(Duration::from_secs(6 * 60)).await;

    assert_eq!(client.on_window_focus(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutation_is_not_retried_and_reaches_hook() {
    let reported = Arc::new(AtomicUsize::new(0));
    let sink = reported.clone();
    let client = QueryClient::with_mutation_error_hook(
      QueryConfig::default(),
      Arc::new(move |_: &ApiError| {
        sink.fetch_add(1, Ordering::SeqCst);
      }),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let attempt = {
      let calls = calls.clone();
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(http(503))
      }
    };
    let err = client.mutate(attempt).await.unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_panicking_hook_does_not_unwind() {
    let client = QueryClient::with_mutation_error_hook(
      QueryConfig::default(),
      Arc::new(|_: &ApiError| panic!("notification failed")),
    );
    let err = client
      .mutate(async { Err::<(), _>(ApiError::Network("down".into())) })
      .await
      .unwrap_err();
    assert!(err.is_network());
    assert_eq!(client.mutate(async { Ok::<_, ApiError>(7) }).await.unwrap(), 7);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_and_get_query_data() {
    let client = QueryClient::default();
    let k = key(&["patients", "A001"]);

    client.set_query_data(&k, String::from("Poppy"));

    assert_eq!(client.get_query_data::<String>(&k).as_deref().map(String::as_str), Some("Poppy"));
    assert!(client.get_query_data::<u32>(&k).is_none());
    assert!(!client.get_query_state::<String>(&k).unwrap().is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_type_mismatch_is_reported() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    let err = client
      .fetch_query(&k, counting(&calls, String::new()))
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Unexpected(_)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_refetch_requires_registered_fetcher() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let k = key(&["patients"]);

    assert!(client.refetch(&k).await.is_err());

    client.fetch_query(&k, counting(&calls, 1u32)).await.unwrap();
    client.refetch(&k).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reset_and_remove() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicUsize::new(0));

    for segments in [&["visits"][..], &["visits", "patient", "A001"][..], &["patients"][..]] {
      client.fetch_query(&key(segments), counting(&calls, 0u8)).await.unwrap();
    }
    assert_eq!(client.remove_queries(&key(&["visits"])), 2);
    assert_eq!(client.len(), 1);

    client.reset();
    assert!(client.is_empty());
  }
}
