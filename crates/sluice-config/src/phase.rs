use std::fmt;

use serde::{Deserialize, Serialize};

/// The three execution phases of a pipeline, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
  Inputs,
  Transforms,
  Outputs,
}

impl Phase {
  /// All phases in execution order.
  pub const ALL: [Phase; 3] = [Phase::Inputs, Phase::Transforms, Phase::Outputs];

  /// The configuration key holding this phase's stage list.
  pub fn key(self) -> &'static str {
    match self {
      Phase::Inputs => "inputs",
      Phase::Transforms => "transforms",
      Phase::Outputs => "outputs",
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}
