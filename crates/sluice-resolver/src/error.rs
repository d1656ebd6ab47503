use sluice_stage::Arity;
use thiserror::Error;

/// Errors that block a run before any stage starts.
#[derive(Debug, Error)]
pub enum WiringError {
  /// The upstream location set does not satisfy the stage's source arity.
  #[error("cannot wire sources of {stage_id}: expected {expected:?}, upstream provides {available}")]
  UnresolvableArity {
    stage_id: String,
    expected: Arity,
    available: usize,
  },

  /// The configuration contains something linting rejects.
  #[error("{stage_id} has not passed linting: {message}")]
  NotLinted { stage_id: String, message: String },

  /// More than one stage writes the same location.
  #[error("location '{location}' is written by more than one stage: {}", writers.join(", "))]
  ConflictingWriters {
    location: String,
    writers: Vec<String>,
  },
}
