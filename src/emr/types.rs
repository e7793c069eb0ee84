//! Wire types of the EMR API. Field names are camelCase on the wire.
//!
//! Every entity has a `New*` counterpart without the server-assigned `id`,
//! used as the body of create requests.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::client::Resource;

/// Partial update body: only the fields present are changed.
pub type FieldPatch = serde_json::Map<String, serde_json::Value>;

/// A record served by one REST resource.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
  /// Body accepted by the resource's create endpoint
  type New: Serialize + DeserializeOwned + Send + Sync;

  const RESOURCE: Resource;

  /// Server-assigned id, used by update and delete
  fn id(&self) -> &str;
}

macro_rules! impl_entity {
  ($($entity:ty => $new:ty, $resource:expr;)+) => {
    $(
      impl Entity for $entity {
        type New = $new;
        const RESOURCE: Resource = $resource;

        fn id(&self) -> &str {
          &self.id
        }
      }
    )+
  };
}

impl_entity! {
  Patient => NewPatient, Resource::Patients;
  Visit => NewVisit, Resource::Visits;
  TestResult => NewTestResult, Resource::TestResults;
  ExamMaster => NewExamMaster, Resource::ExamMaster;
  QuestionTemplate => NewQuestionTemplate, Resource::QuestionTemplates;
  QuestionnaireResponse => NewQuestionnaireResponse, Resource::QuestionnaireResponses;
  UserFilter => NewUserFilter, Resource::UserFilters;
  ClusterAnalysis => NewClusterAnalysis, Resource::ClusterAnalyses;
  Medication => NewMedication, Resource::Medications;
}

/// Registered animal and its owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
  pub id: String,
  pub animal_number: String,
  pub name: String,
  pub owner_name: Option<String>,
  pub species: Option<String>,
  pub breed: Option<String>,
  pub gender: Option<String>,
  pub birth_date: Option<String>,
  pub registration_date: Option<String>,
  pub neutered: Option<bool>,
  /// Body weight in kg
  pub weight: Option<f64>,
  pub microchip_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
  pub animal_number: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub owner_name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub species: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub breed: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub birth_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub registration_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub neutered: Option<bool>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weight: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub microchip_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
  pub id: String,
  pub animal_number: String,
  pub visit_date: String,
  pub visit_type: Option<String>,
  pub chief_complaint: Option<String>,
  pub diagnosis: Option<String>,
  pub treatment: Option<String>,
  pub status: Option<String>,
  pub veterinarian: Option<String>,
  pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVisit {
  pub animal_number: String,
  pub visit_date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub visit_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chief_complaint: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub diagnosis: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub treatment: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub veterinarian: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

/// One lab or imaging result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
  pub id: String,
  pub animal_number: String,
  pub visit_id: Option<String>,
  pub exam_code: String,
  pub test_date: String,
  /// Quantitative value
  pub value: Option<f64>,
  /// Qualitative value
  pub value_text: Option<String>,
  /// H(igh), N(ormal) or L(ow)
  pub status: Option<String>,
  pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestResult {
  pub animal_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub visit_id: Option<String>,
  pub exam_code: String,
  pub test_date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value_text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

/// Catalogue entry describing an exam and its normal range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamMaster {
  pub id: String,
  pub exam_code: String,
  pub exam_name: String,
  pub exam_category: String,
  pub exam_type: Option<String>,
  pub unit: Option<String>,
  pub normal_range_min: Option<f64>,
  pub normal_range_max: Option<f64>,
  pub normal_range_text: Option<String>,
  pub related_body_part: Option<String>,
  pub description: Option<String>,
  pub is_quantitative: Option<bool>,
}

impl ExamMaster {
  /// Classify a quantitative value against the normal range as H, N or L.
  /// Returns `None` when the exam has no numeric range.
  pub fn classify(&self, value: f64) -> Option<&'static str> {
    match (self.normal_range_min, self.normal_range_max) {
      (Some(min), _) if value < min => Some("L"),
      (_, Some(max)) if value > max => Some("H"),
      (None, None) => None,
      _ => Some("N"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExamMaster {
  pub exam_code: String,
  pub exam_name: String,
  pub exam_category: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exam_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub unit: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub normal_range_min: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub normal_range_max: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub normal_range_text: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub related_body_part: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_quantitative: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTemplate {
  pub id: String,
  pub category: String,
  pub question: String,
  /// yes_no, multiple_choice or text
  pub question_type: Option<String>,
  pub options: Option<Vec<String>>,
  pub related_body_part: Option<String>,
  pub display_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestionTemplate {
  pub category: String,
  pub question: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub question_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub options: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub related_body_part: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_order: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
  pub id: String,
  pub animal_number: String,
  pub visit_id: Option<String>,
  pub question_id: String,
  pub response: String,
  pub response_date: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestionnaireResponse {
  pub animal_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub visit_id: Option<String>,
  pub question_id: String,
  pub response: String,
  pub response_date: String,
}

/// Saved research filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilter {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  /// breed, age, exam or custom
  pub filter_type: String,
  /// JSON-encoded criteria, opaque to the client
  pub filter_criteria: String,
  pub created_date: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserFilter {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub filter_type: String,
  pub filter_criteria: String,
  pub created_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAnalysis {
  pub id: String,
  pub name: String,
  pub description: Option<String>,
  pub cluster_type: String,
  pub member_animal_numbers: Option<Vec<String>>,
  pub criteria: Option<String>,
  pub created_date: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewClusterAnalysis {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  pub cluster_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub member_animal_numbers: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub criteria: Option<String>,
  pub created_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medication {
  pub id: String,
  pub animal_number: String,
  pub visit_id: Option<String>,
  pub name: String,
  pub dosage: Option<String>,
  pub frequency: Option<String>,
  /// Days
  pub duration: Option<i32>,
  pub start_date: String,
  pub end_date: Option<String>,
  pub category: Option<String>,
  pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMedication {
  pub animal_number: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub visit_id: Option<String>,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dosage: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub frequency: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<i32>,
  pub start_date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}
