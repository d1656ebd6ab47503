use std::path::PathBuf;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use sluice_lint::LintFailure;
use sluice_resolver::WiringError;
use sluice_stage::RegistryError;
use sluice_template::TemplateError;

/// Errors from triggering runs and serving the trigger API.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
  /// No pipeline with this name and key. The two cases are not distinguished.
  #[error("unable to find pipeline '{name}' with the given api key")]
  PipelineNotFound { name: String },

  #[error("missing variables: {}", .names.join(", "))]
  MissingVariables { names: Vec<String> },

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Lint(#[from] LintFailure),

  #[error(transparent)]
  Wiring(#[from] WiringError),

  #[error("run not found: {run_id}")]
  RunNotFound { run_id: String },

  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// The run queue is full or no longer accepting runs.
  #[error("run queue unavailable")]
  QueueUnavailable,

  #[error("failed to load pipeline definition {}: {message}", .path.display())]
  Catalog { path: PathBuf, message: String },
}

impl TriggerError {
  pub fn status(&self) -> StatusCode {
    match self {
      TriggerError::PipelineNotFound { .. }
      | TriggerError::RunNotFound { .. }
      | TriggerError::Registry(_) => StatusCode::NOT_FOUND,
      TriggerError::MissingVariables { .. }
      | TriggerError::Template(_)
      | TriggerError::Lint(_)
      | TriggerError::Wiring(_) => StatusCode::BAD_REQUEST,
      TriggerError::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      TriggerError::Catalog { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  fn details(&self) -> Option<Value> {
    match self {
      TriggerError::MissingVariables { names } => Some(json!(names)),
      TriggerError::Lint(failure) => serde_json::to_value(&failure.summary).ok(),
      _ => None,
    }
  }
}

impl IntoResponse for TriggerError {
  fn into_response(self) -> Response {
    let mut body = json!({ "error": self.to_string() });
    if let Some(details) = self.details() {
      body["details"] = details;
    }
    (self.status(), Json(body)).into_response()
  }
}
