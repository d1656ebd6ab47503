use sluice_config::Phase;
use sluice_stage::StageError;
use sluice_storage::StorageError;

use crate::state::RunState;

/// Why a stage failed for good.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
  #[error(transparent)]
  Stage(#[from] StageError),

  #[error(transparent)]
  Shard(#[from] ShardError),
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
  /// The run's cancellation token fired.
  #[error("run cancelled")]
  Cancelled,

  /// The graph cannot be executed as wired.
  #[error("invalid graph: {message}")]
  InvalidGraph { message: String },

  /// The first stage failure of the run.
  #[error("{phase} stage {stage_id} ({stage_type}) failed after {attempts} attempt(s): {source}")]
  StageFailed {
    phase: Phase,
    stage_id: String,
    stage_type: String,
    attempts: u32,
    #[source]
    source: StageFailure,
  },

  #[error("illegal run state transition from {from} to {to}")]
  IllegalTransition { from: RunState, to: RunState },

  /// A stage task panicked or could not be joined.
  #[error("internal error: {message}")]
  Internal { message: String },
}

/// Errors from running a stage across shards. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
  /// Too many shards to compose, or the store refused a compose.
  #[error("{shard_count} shard outputs exceed the composition limit of {limit}")]
  CompositionLimit { shard_count: usize, limit: usize },

  #[error("shard {shard} failed: {source}")]
  ShardFailed {
    shard: usize,
    #[source]
    source: StageError,
  },

  /// A shard task panicked.
  #[error("shard task failed: {message}")]
  TaskFailed { message: String },

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("sharded stage cancelled")]
  Cancelled,
}
