//! Run events and notifiers for observability.
//!
//! The runtime emits events as a run progresses so consumers can track it
//! out of band: persist progress, serve it over HTTP, or ignore it.

use serde::{Deserialize, Serialize};
use sluice_config::Phase;
use tokio::sync::mpsc;

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RunEvent {
  RunStarted { run_id: String },

  PhaseStarted { run_id: String, phase: Phase },

  StageStarted {
    run_id: String,
    stage_id: String,
    stage_type: String,
  },

  /// A transient failure will be retried.
  StageRetrying {
    run_id: String,
    stage_id: String,
    attempt: u32,
    error: String,
  },

  /// A stage was split into shards.
  StageSharded {
    run_id: String,
    stage_id: String,
    shards: usize,
  },

  StageCompleted {
    run_id: String,
    stage_id: String,
    attempts: u32,
  },

  StageFailed {
    run_id: String,
    stage_id: String,
    error: String,
  },

  RunCompleted { run_id: String },

  RunFailed { run_id: String, error: String },
}

impl RunEvent {
  pub fn run_id(&self) -> &str {
    match self {
      RunEvent::RunStarted { run_id }
      | RunEvent::PhaseStarted { run_id, .. }
      | RunEvent::StageStarted { run_id, .. }
      | RunEvent::StageRetrying { run_id, .. }
      | RunEvent::StageSharded { run_id, .. }
      | RunEvent::StageCompleted { run_id, .. }
      | RunEvent::StageFailed { run_id, .. }
      | RunEvent::RunCompleted { run_id }
      | RunEvent::RunFailed { run_id, .. } => run_id,
    }
  }
}

/// Receives run events.
///
/// The runtime calls `notify` for each event; implementations decide what to
/// do with it. Called from stage tasks, so it must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// Forwards events to an unbounded channel. Never blocks the run.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // The receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}
