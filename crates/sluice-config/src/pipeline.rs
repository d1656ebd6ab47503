use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::comments::strip_comments;
use crate::error::ConfigError;
use crate::merge::merge_missing;
use crate::phase::Phase;
use crate::stage::StageSpec;

/// Keys allowed at the root of a pipeline document.
pub const ROOT_KEYS: [&str; 5] = ["inputs", "transforms", "outputs", "options", "variables"];

/// A variable a pipeline expects to receive when it is triggered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDecl {
  /// Value used when the trigger does not supply one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

/// A validated pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
  #[serde(default)]
  pub inputs: Vec<StageSpec>,

  #[serde(default)]
  pub transforms: Vec<StageSpec>,

  #[serde(default)]
  pub outputs: Vec<StageSpec>,

  /// Pipeline-wide defaults visible to every stage.
  #[serde(default)]
  pub options: Map<String, Value>,

  #[serde(default)]
  pub variables: BTreeMap<String, VariableDecl>,
}

impl PipelineConfig {
  /// Parse a comment-tolerant JSON document into a typed configuration.
  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    Self::from_value(parse_document(text)?)
  }

  /// Build a typed configuration from an already parsed document.
  pub fn from_value(value: Value) -> Result<Self, ConfigError> {
    serde_json::from_value(value).map_err(|e| ConfigError::Invalid {
      message: e.to_string(),
    })
  }

  /// Stages of the given phase, in declaration order.
  pub fn phase(&self, phase: Phase) -> &[StageSpec] {
    match phase {
      Phase::Inputs => &self.inputs,
      Phase::Transforms => &self.transforms,
      Phase::Outputs => &self.outputs,
    }
  }

  /// Fill in any option the configuration does not set from `defaults`.
  pub fn apply_default_options(&mut self, defaults: &Map<String, Value>) {
    merge_missing(&mut self.options, defaults);
  }

  pub fn stage_count(&self) -> usize {
    self.inputs.len() + self.transforms.len() + self.outputs.len()
  }
}

/// Strip comments and parse a pipeline document into a JSON object.
///
/// Trailing commas and any other JSON syntax error are reported with the
/// line and column of the original text.
pub fn parse_document(text: &str) -> Result<Value, ConfigError> {
  let value: Value = serde_json::from_str(&strip_comments(text)).map_err(ConfigError::from_json)?;

  if value.is_object() {
    Ok(value)
  } else {
    Err(ConfigError::NotAnObject {
      found: json_kind(&value),
    })
  }
}

/// Human-readable name of a JSON value's type.
pub fn json_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
