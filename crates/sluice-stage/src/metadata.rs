use serde::Serialize;

/// How many sources or sinks a stage expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arity {
  Exactly(usize),
  Any,
}

impl Arity {
  /// Whether a list of `count` locations satisfies this arity.
  pub fn accepts(self, count: usize) -> bool {
    match self {
      Arity::Exactly(n) => n == count,
      Arity::Any => true,
    }
  }
}

/// Static facts about a stage type that drive wiring and scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMetadata {
  pub source_arity: Arity,
  pub sink_arity: Arity,
  /// An explicit `sinks` list shorter than an exact sink arity is padded
  /// with temporaries instead of being rejected.
  pub partial_sinks: bool,
  /// Safe to run again after a transient failure.
  pub idempotent: bool,
  /// May be split into record-aligned shards of its single source.
  pub shardable: bool,
}

impl Default for StageMetadata {
  fn default() -> Self {
    Self {
      source_arity: Arity::Any,
      sink_arity: Arity::Exactly(1),
      partial_sinks: false,
      idempotent: false,
      shardable: false,
    }
  }
}

impl StageMetadata {
  /// Metadata for a stage that consumes data and produces nothing downstream.
  pub fn terminal() -> Self {
    Self {
      sink_arity: Arity::Exactly(0),
      ..Self::default()
    }
  }

  pub fn idempotent(mut self) -> Self {
    self.idempotent = true;
    self
  }

  pub fn shardable(mut self) -> Self {
    self.shardable = true;
    self
  }

  pub fn partial_sinks(mut self) -> Self {
    self.partial_sinks = true;
    self
  }

  pub fn with_sources(mut self, arity: Arity) -> Self {
    self.source_arity = arity;
    self
  }

  pub fn with_sinks(mut self, arity: Arity) -> Self {
    self.sink_arity = arity;
    self
  }
}
