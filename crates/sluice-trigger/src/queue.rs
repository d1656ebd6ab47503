//! Run queue with channel-based triggering.
//!
//! The `RunQueue` owns an mpsc channel of wired runs and executes each one
//! on its own task with the shared [`Runtime`].

use std::sync::Arc;

use sluice_runtime::{RunError, Runtime};
use sluice_workflow::WiredGraph;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::board::RunBoard;

/// A run accepted by the trigger endpoint, ready to execute.
#[derive(Debug, Clone)]
pub struct RunRequest {
  pub pipeline: String,
  pub graph: WiredGraph,
}

impl RunRequest {
  pub fn run_id(&self) -> &str {
    &self.graph.run_id
  }
}

/// Executes queued runs concurrently.
///
/// # Usage
///
/// ```ignore
/// let queue = RunQueue::new(runtime, board);
///
/// // Hand the sender to the HTTP service
/// let sender = queue.sender();
///
/// // Start the execution loop
/// let cancel = CancellationToken::new();
/// queue.start(cancel).await;
/// ```
pub struct RunQueue {
  sender: mpsc::Sender<RunRequest>,
  receiver: mpsc::Receiver<RunRequest>,
  runtime: Arc<Runtime>,
  board: Arc<RunBoard>,
}

impl RunQueue {
  pub fn new(runtime: Arc<Runtime>, board: Arc<RunBoard>) -> Self {
    Self::with_buffer_size(runtime, board, 100)
  }

  pub fn with_buffer_size(runtime: Arc<Runtime>, board: Arc<RunBoard>, buffer_size: usize) -> Self {
    let (sender, receiver) = mpsc::channel(buffer_size);
    Self {
      sender,
      receiver,
      runtime,
      board,
    }
  }

  /// A sender handle for submitting runs.
  pub fn sender(&self) -> mpsc::Sender<RunRequest> {
    self.sender.clone()
  }

  /// Start the execution loop.
  ///
  /// Runs until `cancel` fires or every sender is dropped. Each run gets a
  /// child token, so cancelling the queue cancels the runs in flight; the
  /// loop waits for them to finish. Runs still waiting in the channel are
  /// marked failed on the board.
  pub async fn start(self, cancel: CancellationToken) {
    let RunQueue {
      sender,
      mut receiver,
      runtime,
      board,
    } = self;
    drop(sender);

    info!("run_queue_started");
    let mut running = JoinSet::new();

    loop {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          info!("run_queue_cancelled");
          break;
        }
        Some(_) = running.join_next(), if !running.is_empty() => {}
        request = receiver.recv() => {
          let Some(request) = request else {
            info!("run_queue_closed");
            break;
          };
          let runtime = runtime.clone();
          let run_cancel = cancel.child_token();
          running.spawn(execute(runtime, request, run_cancel));
        }
      }
    }

    receiver.close();
    while let Ok(request) = receiver.try_recv() {
      board.abandon(request.run_id(), "run queue stopped before the run started");
    }
    while running.join_next().await.is_some() {}
  }
}

async fn execute(runtime: Arc<Runtime>, request: RunRequest, cancel: CancellationToken) {
  let run_id = request.run_id().to_string();
  info!(run_id = %run_id, pipeline = %request.pipeline, "run_dequeued");

  match runtime.invoke(&request.graph, cancel).await {
    Ok(report) => {
      info!(run_id = %run_id, stages = report.stages.len(), "run_finished");
    }
    Err(RunError::Cancelled) => {
      info!(run_id = %run_id, "run_cancelled");
    }
    Err(e) => {
      error!(run_id = %run_id, error = %e, "run_errored");
    }
  }
}
