use serde::{Deserialize, Serialize};
use sluice_config::Phase;

use crate::state::RunState;

/// How one stage of a successful run went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
  pub stage_id: String,
  pub phase: Phase,
  pub stage_type: String,
  /// Invocations including retries. A sharded stage counts as one.
  pub attempts: u32,
  /// Number of shards when the stage was sharded.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shards: Option<usize>,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
  pub run_id: String,
  pub state: RunState,
  /// Outcomes in execution order.
  pub stages: Vec<StageOutcome>,
}

impl RunReport {
  pub fn stage(&self, stage_id: &str) -> Option<&StageOutcome> {
    self.stages.iter().find(|s| s.stage_id == stage_id)
  }
}
