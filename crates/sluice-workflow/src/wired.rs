use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_config::Phase;

/// The stable id of the stage at `index` within `phase`, e.g. `transforms[1]`.
pub fn stage_id(phase: Phase, index: usize) -> String {
  format!("{}[{index}]", phase.key())
}

/// One stage with its wiring fully decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiredStage {
  pub stage_id: String,
  pub phase: Phase,
  pub index: usize,
  /// Canonical registered type name.
  pub stage_type: String,
  pub params: Map<String, Value>,
  pub sources: Vec<String>,
  pub sinks: Vec<String>,
}

/// A pipeline ready to run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WiredGraph {
  pub run_id: String,
  pub inputs: Vec<WiredStage>,
  pub transforms: Vec<WiredStage>,
  pub outputs: Vec<WiredStage>,
  /// Pipeline-wide options after default merging.
  pub options: Map<String, Value>,
  /// Locations allocated by auto-wiring, in allocation order.
  pub temporaries: Vec<String>,
}

impl WiredGraph {
  pub fn phase(&self, phase: Phase) -> &[WiredStage] {
    match phase {
      Phase::Inputs => &self.inputs,
      Phase::Transforms => &self.transforms,
      Phase::Outputs => &self.outputs,
    }
  }

  /// Every stage, in execution order.
  pub fn stages(&self) -> impl Iterator<Item = &WiredStage> {
    self
      .inputs
      .iter()
      .chain(&self.transforms)
      .chain(&self.outputs)
  }

  pub fn stage(&self, stage_id: &str) -> Option<&WiredStage> {
    self.stages().find(|s| s.stage_id == stage_id)
  }

  pub fn stage_count(&self) -> usize {
    self.inputs.len() + self.transforms.len() + self.outputs.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stage(phase: Phase, index: usize) -> WiredStage {
    WiredStage {
      stage_id: stage_id(phase, index),
      phase,
      index,
      stage_type: "LogConfig".to_string(),
      params: Map::new(),
      sources: vec![],
      sinks: vec![],
    }
  }

  #[test]
  fn test_stage_ids_and_order() {
    let graph = WiredGraph {
      run_id: "run".to_string(),
      inputs: vec![stage(Phase::Inputs, 0), stage(Phase::Inputs, 1)],
      transforms: vec![],
      outputs: vec![stage(Phase::Outputs, 0)],
      options: Map::new(),
      temporaries: vec![],
    };

    let ids: Vec<_> = graph.stages().map(|s| s.stage_id.as_str()).collect();
    assert_eq!(ids, vec!["inputs[0]", "inputs[1]", "outputs[0]"]);
    assert_eq!(graph.stage("outputs[0]").map(|s| s.phase), Some(Phase::Outputs));
    assert!(graph.stage("transforms[0]").is_none());
    assert_eq!(graph.stage_count(), 3);
  }

  #[test]
  fn test_serializes_camel_case() {
    let value = serde_json::to_value(stage(Phase::Transforms, 2)).unwrap();
    assert_eq!(value["stageId"], "transforms[2]");
    assert_eq!(value["phase"], "transforms");
    assert_eq!(value["stageType"], "LogConfig");
  }
}
