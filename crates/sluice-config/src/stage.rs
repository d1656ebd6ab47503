use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// How a stage's `sources` or `sinks` were declared.
///
/// The three states are distinct: an omitted key asks the wiring resolver to
/// fill the list in, an explicit `null` opts the stage out of wiring entirely,
/// and an explicit list is used verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Wiring {
  /// Key absent from the stage object.
  #[default]
  Omitted,
  /// Key present with a `null` value.
  Suppressed,
  /// Key present with a list. `None` entries are lint errors and are kept
  /// only so they can be reported.
  Explicit(Vec<Option<String>>),
}

impl Wiring {
  pub fn is_omitted(&self) -> bool {
    matches!(self, Wiring::Omitted)
  }

  /// The explicit list, if every entry is a concrete location.
  pub fn locations(&self) -> Option<Vec<String>> {
    match self {
      Wiring::Explicit(entries) => entries.iter().cloned().collect(),
      _ => None,
    }
  }

  /// True for an explicit list that contains a `null` entry.
  pub fn has_null_entry(&self) -> bool {
    matches!(self, Wiring::Explicit(entries) if entries.iter().any(Option::is_none))
  }
}

impl<'de> Deserialize<'de> for Wiring {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    // Only called when the key is present; `#[serde(default)]` covers omission.
    let value: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(match value {
      None => Wiring::Suppressed,
      Some(entries) => Wiring::Explicit(entries),
    })
  }
}

impl Serialize for Wiring {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    match self {
      Wiring::Omitted | Wiring::Suppressed => serializer.serialize_none(),
      Wiring::Explicit(entries) => entries.serialize(serializer),
    }
  }
}

/// One stage entry of a pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
  /// Registered stage type name.
  #[serde(rename = "type")]
  pub stage_type: String,

  #[serde(default, skip_serializing_if = "Wiring::is_omitted")]
  pub sources: Wiring,

  #[serde(default, skip_serializing_if = "Wiring::is_omitted")]
  pub sinks: Wiring,

  /// Every other key of the stage object. Keys a stage does not read are
  /// inert, which is how inline documentation keys are written.
  #[serde(flatten)]
  pub params: Map<String, Value>,
}

impl StageSpec {
  pub fn new(stage_type: impl Into<String>) -> Self {
    Self {
      stage_type: stage_type.into(),
      sources: Wiring::Omitted,
      sinks: Wiring::Omitted,
      params: Map::new(),
    }
  }
}
