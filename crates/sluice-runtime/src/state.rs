use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Lifecycle of one run.
///
/// `Pending -> Running -> Succeeded | Failed`. A pending run that never
/// starts (cancelled while queued) may fail directly. Terminal states are
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
  Pending,
  Running,
  Succeeded,
  Failed,
}

impl RunState {
  pub fn is_terminal(self) -> bool {
    matches!(self, RunState::Succeeded | RunState::Failed)
  }

  /// Move to `next`, rejecting transitions the lifecycle does not allow.
  pub fn transition(self, next: RunState) -> Result<RunState, RunError> {
    let legal = matches!(
      (self, next),
      (RunState::Pending, RunState::Running)
        | (RunState::Pending, RunState::Failed)
        | (RunState::Running, RunState::Succeeded)
        | (RunState::Running, RunState::Failed)
    );
    if legal {
      Ok(next)
    } else {
      Err(RunError::IllegalTransition {
        from: self,
        to: next,
      })
    }
  }
}

impl fmt::Display for RunState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      RunState::Pending => "pending",
      RunState::Running => "running",
      RunState::Succeeded => "succeeded",
      RunState::Failed => "failed",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_legal_transitions() {
    let running = RunState::Pending.transition(RunState::Running).unwrap();
    assert_eq!(running.transition(RunState::Succeeded).unwrap(), RunState::Succeeded);
    assert_eq!(running.transition(RunState::Failed).unwrap(), RunState::Failed);
    assert_eq!(
      RunState::Pending.transition(RunState::Failed).unwrap(),
      RunState::Failed
    );
  }

  #[test]
  fn test_terminal_states_are_final() {
    for terminal in [RunState::Succeeded, RunState::Failed] {
      assert!(terminal.is_terminal());
      for next in [
        RunState::Pending,
        RunState::Running,
        RunState::Succeeded,
        RunState::Failed,
      ] {
        assert!(matches!(
          terminal.transition(next),
          Err(RunError::IllegalTransition { .. })
        ));
      }
    }
    assert!(RunState::Running.transition(RunState::Pending).is_err());
    assert!(RunState::Pending.transition(RunState::Succeeded).is_err());
  }
}
