use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_config::Phase;
use sluice_runtime::{ExecutionNotifier, RunEvent, RunState};
use tracing::warn;

/// Progress of one triggered run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
  pub run_id: String,
  pub pipeline: String,
  pub state: RunState,
  /// The phase currently (or last) executing.
  pub phase: Option<Phase>,
  /// Stage ids that finished successfully, in completion order.
  pub completed_stages: Vec<String>,
  pub retries: u32,
  /// The error that failed the run.
  pub error: Option<String>,
  pub queued_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Tracks run progress out of band, fed by runtime events.
#[derive(Debug, Default)]
pub struct RunBoard {
  runs: RwLock<HashMap<String, RunStatus>>,
}

impl RunBoard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a run that has been accepted but not started.
  pub fn queued(&self, run_id: &str, pipeline: &str) {
    let now = Utc::now();
    let status = RunStatus {
      run_id: run_id.to_string(),
      pipeline: pipeline.to_string(),
      state: RunState::Pending,
      phase: None,
      completed_stages: Vec::new(),
      retries: 0,
      error: None,
      queued_at: now,
      updated_at: now,
    };
    self
      .runs
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(run_id.to_string(), status);
  }

  /// Fail a run that never started.
  pub fn abandon(&self, run_id: &str, error: &str) {
    self.update(run_id, |status| {
      transition(status, RunState::Failed);
      status.error = Some(error.to_string());
    });
  }

  pub fn get(&self, run_id: &str) -> Option<RunStatus> {
    self
      .runs
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(run_id)
      .cloned()
  }

  pub fn len(&self) -> usize {
    self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn update(&self, run_id: &str, apply: impl FnOnce(&mut RunStatus)) {
    let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
    match runs.get_mut(run_id) {
      Some(status) => {
        apply(status);
        status.updated_at = Utc::now();
      }
      None => warn!(run_id = %run_id, "event for unknown run"),
    }
  }
}

fn transition(status: &mut RunStatus, next: RunState) {
  match status.state.transition(next) {
    Ok(state) => status.state = state,
    Err(e) => warn!(run_id = %status.run_id, error = %e, "run_state_rejected"),
  }
}

impl ExecutionNotifier for RunBoard {
  fn notify(&self, event: RunEvent) {
    let run_id = event.run_id().to_string();
    self.update(&run_id, |status| match event {
      RunEvent::RunStarted { .. } => transition(status, RunState::Running),
      RunEvent::PhaseStarted { phase, .. } => status.phase = Some(phase),
      RunEvent::StageRetrying { .. } => status.retries += 1,
      RunEvent::StageCompleted { stage_id, .. } => status.completed_stages.push(stage_id),
      RunEvent::RunCompleted { .. } => transition(status, RunState::Succeeded),
      RunEvent::RunFailed { error, .. } => {
        transition(status, RunState::Failed);
        status.error = Some(error);
      }
      RunEvent::StageStarted { .. }
      | RunEvent::StageSharded { .. }
      | RunEvent::StageFailed { .. } => {}
    });
  }
}
