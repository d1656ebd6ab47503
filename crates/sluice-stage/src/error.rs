use sluice_storage::StorageError;
use thiserror::Error;

/// Errors a stage run can end with.
#[derive(Debug, Error)]
pub enum StageError {
  /// A failure that may succeed if the stage is run again.
  #[error("transient failure: {message}")]
  Transient { message: String },

  /// A failure that will recur on every attempt.
  #[error("{message}")]
  Permanent { message: String },

  /// The invocation exceeded its deadline.
  #[error("stage timed out after {timeout_ms}ms")]
  Timeout { timeout_ms: u64 },

  /// The run was cancelled while the stage was executing.
  #[error("stage cancelled")]
  Cancelled,

  #[error("storage error: {0}")]
  Storage(#[from] StorageError),
}

impl StageError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient {
      message: message.into(),
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self::Permanent {
      message: message.into(),
    }
  }

  /// Whether the orchestrator may retry an idempotent stage after this error.
  pub fn is_transient(&self) -> bool {
    match self {
      StageError::Transient { .. } | StageError::Timeout { .. } => true,
      StageError::Storage(e) => e.is_transient(),
      StageError::Permanent { .. } | StageError::Cancelled => false,
    }
  }
}

/// Errors from stage registry lookups and construction.
#[derive(Debug, Error)]
pub enum RegistryError {
  /// No stage is registered under this type name.
  #[error("unknown stage type '{stage_type}'")]
  UnknownStageType { stage_type: String },

  /// Two factories were registered under the same (case-insensitive) name.
  #[error("stage type '{stage_type}' registered twice")]
  DuplicateStageType { stage_type: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_classification() {
    assert!(StageError::transient("reset").is_transient());
    assert!(StageError::Timeout { timeout_ms: 10 }.is_transient());
    assert!(!StageError::permanent("bad input").is_transient());
    assert!(!StageError::Cancelled.is_transient());
    assert!(
      !StageError::Storage(StorageError::NotFound {
        location: "store://b/x".to_string()
      })
      .is_transient()
    );
    assert!(
      StageError::Storage(StorageError::Io(std::io::Error::from(
        std::io::ErrorKind::TimedOut
      )))
      .is_transient()
    );
  }
}
