use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_lint::LintSummary;

use crate::board::RunStatus;
use crate::catalog::config_text;
use crate::error::TriggerError;
use crate::service::{StageHelp, TriggerAccepted, TriggerService, VariableEntry};

/// The trigger API.
///
/// | Route | |
/// |---|---|
/// | `GET/POST /run/{name}/{api_key}?var=value` | queue a run |
/// | `GET /runs/{run_id}` | run progress |
/// | `POST /lint` | lint a document |
/// | `POST /variables` | reconcile a document's variables |
/// | `GET /stages`, `GET /stages/{type}` | stage help |
pub fn router(service: Arc<TriggerService>) -> Router {
  Router::new()
    .route("/run/{name}/{api_key}", get(trigger_run).post(trigger_run))
    .route("/runs/{run_id}", get(run_status))
    .route("/lint", post(lint))
    .route("/variables", post(variables))
    .route("/stages", get(stages))
    .route("/stages/{stage_type}", get(stage))
    .with_state(service)
}

async fn trigger_run(
  State(service): State<Arc<TriggerService>>,
  Path((name, api_key)): Path<(String, String)>,
  Query(params): Query<Vec<(String, String)>>,
) -> Result<(StatusCode, Json<TriggerAccepted>), TriggerError> {
  let accepted = service.trigger(&name, &api_key, &params)?;
  Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn run_status(
  State(service): State<Arc<TriggerService>>,
  Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, TriggerError> {
  Ok(Json(service.run_status(&run_id)?))
}

#[derive(Debug, Deserialize)]
struct LintRequest {
  config: Value,
}

#[derive(Debug, Serialize)]
struct LintResponse {
  config: Value,
  lint: LintSummary,
}

async fn lint(
  State(service): State<Arc<TriggerService>>,
  Json(request): Json<LintRequest>,
) -> Json<LintResponse> {
  let lint = service.lint(&config_text(&request.config));
  Json(LintResponse {
    config: request.config,
    lint,
  })
}

#[derive(Debug, Serialize, Deserialize)]
struct VariablesRequest {
  config: Value,
  #[serde(default)]
  variables: Vec<VariableEntry>,
}

async fn variables(
  State(service): State<Arc<TriggerService>>,
  Json(request): Json<VariablesRequest>,
) -> Result<Json<VariablesRequest>, TriggerError> {
  let variables = service.reconcile_variables(&config_text(&request.config), request.variables)?;
  Ok(Json(VariablesRequest {
    config: request.config,
    variables,
  }))
}

async fn stages(State(service): State<Arc<TriggerService>>) -> Json<Vec<StageHelp>> {
  Json(service.stages())
}

async fn stage(
  State(service): State<Arc<TriggerService>>,
  Path(stage_type): Path<String>,
) -> Result<Json<StageHelp>, TriggerError> {
  Ok(Json(service.stage(&stage_type)?))
}
