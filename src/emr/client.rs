use clap::ValueEnum;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::{ApiClient, ApiError, RequestOptions};

use super::types::FieldPatch;

/// REST resources exposed under `/api/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum Resource {
  Patients,
  Visits,
  TestResults,
  ExamMaster,
  QuestionTemplates,
  QuestionnaireResponses,
  UserFilters,
  #[value(name = "clusters")]
  ClusterAnalyses,
  Medications,
}

impl Resource {
  pub const ALL: [Resource; 9] = [
    Resource::Patients,
    Resource::Visits,
    Resource::TestResults,
    Resource::ExamMaster,
    Resource::QuestionTemplates,
    Resource::QuestionnaireResponses,
    Resource::UserFilters,
    Resource::ClusterAnalyses,
    Resource::Medications,
  ];

  /// Endpoint path relative to the API root
  pub fn path(self) -> &'static str {
    match self {
      Resource::Patients => "patients",
      Resource::Visits => "visits",
      Resource::TestResults => "test-results",
      Resource::ExamMaster => "exam-master",
      Resource::QuestionTemplates => "question-templates",
      Resource::QuestionnaireResponses => "questionnaire-responses",
      Resource::UserFilters => "user-filters",
      Resource::ClusterAnalyses => "cluster-analysis",
      Resource::Medications => "medications",
    }
  }

  /// Whether the list endpoint accepts an `animalNumber` filter
  pub fn is_patient_scoped(self) -> bool {
    matches!(
      self,
      Resource::Visits
        | Resource::TestResults
        | Resource::QuestionnaireResponses
        | Resource::Medications
    )
  }
}

/// EMR API client wrapper
#[derive(Clone)]
pub struct EmrClient {
  api: ApiClient,
}

impl EmrClient {
  pub fn new(api: ApiClient) -> Self {
    Self { api }
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  /// List a resource, optionally filtered by animal number
  pub async fn list<T: DeserializeOwned>(
    &self,
    resource: Resource,
    animal_number: Option<&str>,
  ) -> Result<Vec<T>, ApiError> {
    let mut options = RequestOptions::get();
    if let Some(n) = animal_number.filter(|_| resource.is_patient_scoped()) {
      options = options.with_query("animalNumber", n);
    }
    self.api.request(resource.path(), options).await
  }

  /// Get a single record. Patients are looked up by animal number.
  pub async fn get<T: DeserializeOwned>(
    &self,
    resource: Resource,
    id: &str,
  ) -> Result<T, ApiError> {
    self
      .api
      .request(&record_path(resource, id), RequestOptions::get())
      .await
  }

  pub async fn create<T, B>(&self, resource: Resource, body: &B) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let body = to_body(body)?;
    self
      .api
      .request(resource.path(), RequestOptions::post(body))
      .await
  }

  /// Apply a partial update to the record with the given server id
  pub async fn update<T: DeserializeOwned>(
    &self,
    resource: Resource,
    id: &str,
    patch: &FieldPatch,
  ) -> Result<T, ApiError> {
    self
      .api
      .request(
        &record_path(resource, id),
        RequestOptions::put(Value::Object(patch.clone())),
      )
      .await
  }

  pub async fn delete(&self, resource: Resource, id: &str) -> Result<(), ApiError> {
    self
      .api
      .request_unit(&record_path(resource, id), RequestOptions::delete())
      .await
  }
}

fn record_path(resource: Resource, id: &str) -> String {
  format!("{}/{}", resource.path(), id)
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
  serde_json::to_value(body)
    .map_err(|e| ApiError::Unexpected(format!("Failed to encode request body: {}", e)))
}
