use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
  /// The API answered again after being unreachable
  Online,
  /// The API stopped answering
  Offline,
}

/// Probes the API on a fixed interval and reports transitions
pub struct ConnectivityMonitor {
  rx: mpsc::UnboundedReceiver<NetworkEvent>,
  task: JoinHandle<()>,
}

impl ConnectivityMonitor {
  /// Monitor the given API with its health probe
  pub fn new(api: ApiClient, interval: Duration) -> Self {
    Self::with_probe(interval, move || {
      let api = api.clone();
      async move { api.probe().await }
    })
  }

  /// Monitor with a custom probe. The first probe only establishes the
  /// baseline; events are sent on changes after that.
  pub fn with_probe<P, Fut>(interval: Duration, probe: P) -> Self
  where
    P: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut online: Option<bool> = None;

      loop {
        ticker.tick().await;
        let reachable = probe().await;

        let event = match (online, reachable) {
          (None, _) => {
            debug!(reachable, "connectivity baseline");
            None
          }
          (Some(false), true) => Some(NetworkEvent::Online),
          (Some(true), false) => Some(NetworkEvent::Offline),
          _ => None,
        };
        online = Some(reachable);

        if let Some(event) = event {
          match event {
            NetworkEvent::Online => info!("api reachable again"),
            NetworkEvent::Offline => warn!("api unreachable"),
          }
          if tx.send(event).is_err() {
            break;
          }
        }
      }
    });

    Self { rx, task }
  }

  /// Receive the next transition
  pub async fn next(&mut self) -> Option<NetworkEvent> {
    self.rx.recv().await
  }
}

impl Drop for ConnectivityMonitor {
  fn drop(&mut self) {
    self.task.abort();
  }
}
