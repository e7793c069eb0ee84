//! Command-line subcommands.

use clap::Subcommand;
use std::path::PathBuf;
use vetemr::emr::Resource;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
  /// Registered animals (looked up by animal number)
  #[command(subcommand, visible_alias = "p")]
  Patients(CrudAction),
  #[command(subcommand, visible_alias = "v")]
  Visits(CrudAction),
  #[command(subcommand, visible_alias = "t")]
  TestResults(CrudAction),
  /// Exam catalogue with normal ranges
  #[command(subcommand)]
  ExamMaster(CrudAction),
  #[command(subcommand)]
  QuestionTemplates(CrudAction),
  #[command(subcommand, visible_alias = "q")]
  QuestionnaireResponses(CrudAction),
  /// Saved research filters
  #[command(subcommand, visible_alias = "filters")]
  UserFilters(CrudAction),
  #[command(subcommand, name = "clusters")]
  ClusterAnalyses(CrudAction),
  #[command(subcommand, visible_alias = "m")]
  Medications(CrudAction),
  /// Keep a listing cached and print every update until interrupted
  Watch {
    resource: Resource,
    /// Only records of this animal number
    #[arg(short, long)]
    patient: Option<String>,
  },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CrudAction {
  /// List records
  #[command(visible_alias = "ls")]
  List {
    /// Only records of this animal number
    #[arg(short, long)]
    patient: Option<String>,
  },
  /// Show one record (patients by animal number, others by id)
  Show { id: String },
  /// Create a record from a JSON file (`-` reads stdin)
  Create {
    #[arg(short, long)]
    file: PathBuf,
  },
  /// Apply a partial JSON update to a record
  Update {
    id: String,
    #[arg(short, long)]
    file: PathBuf,
  },
  #[command(visible_alias = "rm")]
  Delete { id: String },
}

impl Command {
  /// Split a resource command into its resource and action.
  /// Returns `None` for commands that are not CRUD actions.
  pub fn into_crud(self) -> Option<(Resource, CrudAction)> {
    let pair = match self {
      Command::Patients(action) => (Resource::Patients, action),
      Command::Visits(action) => (Resource::Visits, action),
      Command::TestResults(action) => (Resource::TestResults, action),
      Command::ExamMaster(action) => (Resource::ExamMaster, action),
      Command::QuestionTemplates(action) => (Resource::QuestionTemplates, action),
      Command::QuestionnaireResponses(action) => (Resource::QuestionnaireResponses, action),
      Command::UserFilters(action) => (Resource::UserFilters, action),
      Command::ClusterAnalyses(action) => (Resource::ClusterAnalyses, action),
      Command::Medications(action) => (Resource::Medications, action),
      Command::Watch { .. } => return None,
    };
    Some(pair)
  }
}
