use crate::commands::{Command, CrudAction};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use vetemr::api::ApiClient;
use vetemr::config::Config;
use vetemr::emr::types::{
  ClusterAnalysis, Entity, ExamMaster, FieldPatch, Medication, Patient, QuestionTemplate,
  QuestionnaireResponse, TestResult, UserFilter, Visit,
};
use vetemr::emr::{CachedEmrClient, EmrClient, Resource};
use vetemr::event::{ConnectivityMonitor, NetworkEvent};
use vetemr::query::{QueryClient, QueryState};

/// Run `$body` with `$entity` bound to the record type of `$resource`.
macro_rules! with_entity {
  ($resource:expr, $entity:ident => $body:expr) => {
    match $resource {
      Resource::Patients => {
        type $entity = Patient;
        $body
      }
      Resource::Visits => {
        type $entity = Visit;
        $body
      }
      Resource::TestResults => {
        type $entity = TestResult;
        $body
      }
      Resource::ExamMaster => {
        type $entity = ExamMaster;
        $body
      }
      Resource::QuestionTemplates => {
        type $entity = QuestionTemplate;
        $body
      }
      Resource::QuestionnaireResponses => {
        type $entity = QuestionnaireResponse;
        $body
      }
      Resource::UserFilters => {
        type $entity = UserFilter;
        $body
      }
      Resource::ClusterAnalyses => {
        type $entity = ClusterAnalysis;
        $body
      }
      Resource::Medications => {
        type $entity = Medication;
        $body
      }
    }
  };
}

/// Main application state
pub struct App {
  /// Application configuration
  config: Config,

  /// Cached EMR client
  emr: CachedEmrClient,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let api = ApiClient::new(&config.api.url)
      .map_err(|e| eyre!("Failed to create API client: {}", e))?;
    let cache = QueryClient::new(config.query_config());

    Ok(Self {
      emr: CachedEmrClient::new(EmrClient::new(api), cache),
      config,
    })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Watch { resource, patient } => {
        with_entity!(resource, E => self.watch::<E>(patient.as_deref()).await)
      }
      command => {
        let (resource, action) = command
          .into_crud()
          .ok_or_else(|| eyre!("Unsupported command"))?;
        with_entity!(resource, E => self.crud::<E>(action).await)
      }
    }
  }

  async fn crud<E: Entity>(&self, action: CrudAction) -> Result<()> {
    let resource = E::RESOURCE.path();

    match action {
      CrudAction::List { patient } => {
        let records = self
          .emr
          .list::<E>(patient.as_deref())
          .await
          .map_err(|e| eyre!("Failed to list {}: {}", resource, e))?;
        print_json(&*records)
      }
      CrudAction::Show { id } => {
        let record = self
          .emr
          .get::<E>(&id)
          .await
          .map_err(|e| eyre!("Failed to get {} {}: {}", resource, id, e))?;
        print_json(&*record)
      }
      CrudAction::Create { file } => {
        let new: E::New = read_json(&file)?;
        let created = self
          .emr
          .create::<E>(&new)
          .await
          .map_err(|e| eyre!("Failed to create {}: {}", resource, e))?;
        print_json(&created)
      }
      CrudAction::Update { id, file } => {
        let patch: FieldPatch = read_json(&file)?;
        let updated = self
          .emr
          .update::<E>(&id, &patch)
          .await
          .map_err(|e| eyre!("Failed to update {} {}: {}", resource, id, e))?;
        print_json(&updated)
      }
      CrudAction::Delete { id } => {
        self
          .emr
          .delete::<E>(&id)
          .await
          .map_err(|e| eyre!("Failed to delete {} {}: {}", resource, id, e))?;
        println!("Deleted {} {}", resource, id);
        Ok(())
      }
    }
  }

  /// Observe a listing and report every settle until Ctrl-C. Reconnects
  /// refetch it; once it goes stale it is invalidated, which refetches it in
  /// the background.
  async fn watch<E: Entity>(&self, patient: Option<&str>) -> Result<()> {
    let mut observer = self.emr.observe_list::<E>(patient);
    let mut monitor = ConnectivityMonitor::new(
      self.emr.inner().api().clone(),
      self.config.cache.health_check_interval(),
    );
    let stale_time = self.emr.cache().config().stale_time.max(Duration::from_secs(1));
    let first_refresh = tokio::time::Instant::now() + stale_time;
    let mut refresh = tokio::time::interval_at(first_refresh, stale_time);
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(key = %observer.key(), "watching");
    println!("Watching {} (Ctrl-C to stop)", observer.key());

    loop {
      tokio::select! {
        changed = observer.changed() => {
          if !changed {
            break;
          }
          println!("{}", summarize(E::RESOURCE, &observer.state()));
        }
        event = monitor.next() => match event {
          Some(NetworkEvent::Online) => {
            let started = self.emr.cache().on_reconnect();
            println!("Back online, refetching {} queries", started);
          }
          Some(NetworkEvent::Offline) => println!("Offline, showing cached data"),
          None => break,
        },
        _ = refresh.tick() => {
          let state = observer.state();
          if state.is_stale && !state.is_loading() {
            self.emr.cache().invalidate_queries(observer.key());
          }
        }
        _ = tokio::signal::ctrl_c() => break,
      }
    }

    Ok(())
  }
}

/// One status line for a watched listing
fn summarize<T>(resource: Resource, state: &QueryState<Vec<T>>) -> String {
  let updated = state
    .updated_at
    .map(|t| t.format("%H:%M:%S").to_string())
    .unwrap_or_else(|| "--:--:--".to_string());
  let count = state.data().map(Vec::len);

  match (state.error(), count) {
    (Some(err), Some(n)) => format!(
      "[{}] {}: {} (showing {} cached records)",
      updated,
      resource.path(),
      err,
      n
    ),
    (Some(err), None) => format!("[{}] {}: {}", updated, resource.path(), err),
    (None, Some(n)) => format!("[{}] {}: {} records", updated, resource.path(), n),
    (None, None) => format!("[{}] {}: loading", updated, resource.path()),
  }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

/// Read a JSON document from `path`, or stdin for `-`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let contents = if path == Path::new("-") {
    std::io::read_to_string(std::io::stdin())
      .map_err(|e| eyre!("Failed to read stdin: {}", e))?
  } else {
    std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?
  };

  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use vetemr::api::ApiError;
  use vetemr::emr::types::NewPatient;
  use vetemr::query::QueryStatus;

  fn state(data: Option<Vec<u8>>, error: Option<ApiError>) -> QueryState<Vec<u8>> {
    QueryState {
      status: if error.is_some() {
        QueryStatus::Error
      } else {
        QueryStatus::Success
      },
      data: data.map(Arc::new),
      error,
      failure_count: 0,
      updated_at: None,
      is_stale: false,
    }
  }

  #[test]
  fn test_summarize() {
    assert_eq!(
      summarize(Resource::Visits, &state(Some(vec![1, 2]), None)),
      "[--:--:--] visits: 2 records"
    );
    assert_eq!(
      summarize(
        Resource::Visits,
        &state(Some(vec![1]), Some(ApiError::Network("refused".into())))
      ),
      "[--:--:--] visits: Network error: refused (showing 1 cached records)"
    );
    assert_eq!(
      summarize(Resource::Patients, &QueryState::<Vec<u8>>::idle()),
      "[--:--:--] patients: loading"
    );
  }

  #[test]
  fn test_read_json_file() {
    let path = std::env::temp_dir().join(format!("vetemr-new-patient-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"animalNumber":"A010","name":"Choco","species":"dog"}"#).unwrap();

    let new: NewPatient = read_json(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(new.animal_number, "A010");
    assert_eq!(new.species.as_deref(), Some("dog"));
  }

  #[test]
  fn test_read_json_reports_path() {
    let err = read_json::<FieldPatch>(Path::new("/nonexistent/patch.json")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/patch.json"));
  }
}
