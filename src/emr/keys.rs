//! Query keys for EMR resources.

use crate::query::{AsQueryKey, QueryKey};

use super::client::Resource;

/// Query key types for EMR API calls.
///
/// Per-patient and per-record keys extend their resource's root key, so
/// invalidating the root covers them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EmrQueryKey {
  Patients,
  /// Patients are addressed by animal number, not server id
  Patient { animal_number: String },
  Visits,
  PatientVisits { animal_number: String },
  Visit { id: String },
  TestResults,
  PatientTestResults { animal_number: String },
  ExamMaster,
  QuestionTemplates,
  QuestionnaireResponses,
  PatientQuestionnaireResponses { animal_number: String },
  UserFilters,
  ClusterAnalyses,
  Medications,
  PatientMedications { animal_number: String },
  /// Any other single record fetched by id
  Record { resource: Resource, id: String },
}

impl EmrQueryKey {
  /// Key for a resource listing, optionally scoped to one patient.
  ///
  /// Resources that cannot be filtered by patient ignore the scope.
  pub fn list(resource: Resource, animal_number: Option<&str>) -> Self {
    match (resource, animal_number) {
      (Resource::Patients, _) => Self::Patients,
      (Resource::Visits, Some(n)) => Self::PatientVisits {
        animal_number: n.to_string(),
      },
      (Resource::Visits, None) => Self::Visits,
      (Resource::TestResults, Some(n)) => Self::PatientTestResults {
        animal_number: n.to_string(),
      },
      (Resource::TestResults, None) => Self::TestResults,
      (Resource::ExamMaster, _) => Self::ExamMaster,
      (Resource::QuestionTemplates, _) => Self::QuestionTemplates,
      (Resource::QuestionnaireResponses, Some(n)) => Self::PatientQuestionnaireResponses {
        animal_number: n.to_string(),
      },
      (Resource::QuestionnaireResponses, None) => Self::QuestionnaireResponses,
      (Resource::UserFilters, _) => Self::UserFilters,
      (Resource::ClusterAnalyses, _) => Self::ClusterAnalyses,
      (Resource::Medications, Some(n)) => Self::PatientMedications {
        animal_number: n.to_string(),
      },
      (Resource::Medications, None) => Self::Medications,
    }
  }

  /// Key for a single record. `id` is the animal number for patients.
  pub fn detail(resource: Resource, id: &str) -> Self {
    match resource {
      Resource::Patients => Self::Patient {
        animal_number: id.to_string(),
      },
      Resource::Visits => Self::Visit { id: id.to_string() },
      resource => Self::Record {
        resource,
        id: id.to_string(),
      },
    }
  }

  /// Root key of a resource; a prefix of every key for that resource.
  pub fn root(resource: Resource) -> QueryKey {
    match resource {
      Resource::Patients => QueryKey::new(["patients"]),
      Resource::Visits => QueryKey::new(["visits"]),
      Resource::TestResults => QueryKey::new(["testResults"]),
      Resource::ExamMaster => QueryKey::new(["examMaster"]),
      Resource::QuestionTemplates => QueryKey::new(["questionnaire", "templates"]),
      Resource::QuestionnaireResponses => QueryKey::new(["questionnaire", "responses"]),
      Resource::UserFilters => QueryKey::new(["filters"]),
      Resource::ClusterAnalyses => QueryKey::new(["clusters"]),
      Resource::Medications => QueryKey::new(["medications"]),
    }
  }
}

impl AsQueryKey for EmrQueryKey {
  fn query_key(&self) -> QueryKey {
    match self {
      Self::Patients => Self::root(Resource::Patients),
      Self::Patient { animal_number } => Self::root(Resource::Patients).with(animal_number),
      Self::Visits => Self::root(Resource::Visits),
      Self::PatientVisits { animal_number } => Self::root(Resource::Visits)
        .with("patient")
        .with(animal_number),
      Self::Visit { id } => Self::root(Resource::Visits).with("detail").with(id),
      Self::TestResults => Self::root(Resource::TestResults),
      Self::PatientTestResults { animal_number } => Self::root(Resource::TestResults)
        .with("patient")
        .with(animal_number),
      Self::ExamMaster => Self::root(Resource::ExamMaster),
      Self::QuestionTemplates => Self::root(Resource::QuestionTemplates),
      Self::QuestionnaireResponses => Self::root(Resource::QuestionnaireResponses),
      Self::PatientQuestionnaireResponses { animal_number } => {
        Self::root(Resource::QuestionnaireResponses).with(animal_number)
      }
      Self::UserFilters => Self::root(Resource::UserFilters),
      Self::ClusterAnalyses => Self::root(Resource::ClusterAnalyses),
      Self::Medications => Self::root(Resource::Medications),
      Self::PatientMedications { animal_number } => Self::root(Resource::Medications)
        .with("patient")
        .with(animal_number),
      Self::Record { resource, id } => Self::root(*resource).with("detail").with(id),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Patients => "all patients".to_string(),
      Self::Patient { animal_number } => format!("patient {}", animal_number),
      Self::Visits => "all visits".to_string(),
      Self::PatientVisits { animal_number } => format!("visits of {}", animal_number),
      Self::Visit { id } => format!("visit {}", id),
      Self::TestResults => "all test results".to_string(),
      Self::PatientTestResults { animal_number } => format!("test results of {}", animal_number),
      Self::ExamMaster => "exam catalogue".to_string(),
      Self::QuestionTemplates => "question templates".to_string(),
      Self::QuestionnaireResponses => "all questionnaire responses".to_string(),
      Self::PatientQuestionnaireResponses { animal_number } => {
        format!("questionnaire responses of {}", animal_number)
      }
      Self::UserFilters => "user filters".to_string(),
      Self::ClusterAnalyses => "cluster analyses".to_string(),
      Self::Medications => "all medications".to_string(),
      Self::PatientMedications { animal_number } => format!("medications of {}", animal_number),
      Self::Record { resource, id } => format!("{} {}", resource.path(), id),
    }
  }
}
