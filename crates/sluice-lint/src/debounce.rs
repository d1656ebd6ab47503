use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::linter::Linter;
use crate::result::LintResult;

/// Re-lints a document once edits have been quiet for a window.
///
/// Every [`LintDebouncer::edit`] restarts the quiescence timer and discards
/// any lint already in flight, so only the latest text produces a result.
/// Results are delivered on the channel passed to [`LintDebouncer::spawn`].
#[derive(Debug, Clone)]
pub struct LintDebouncer {
  edits: mpsc::UnboundedSender<String>,
}

impl LintDebouncer {
  /// Start the debounce loop. It runs until `cancel` fires, the debouncer
  /// is dropped, or the result receiver goes away.
  pub fn spawn(
    linter: Arc<Linter>,
    window: Duration,
    results: mpsc::UnboundedSender<LintResult>,
    cancel: CancellationToken,
  ) -> Self {
    let (edits, receiver) = mpsc::unbounded_channel();
    tokio::spawn(debounce_loop(linter, window, receiver, results, cancel));
    Self { edits }
  }

  /// Submit the latest text. Returns false once the loop has stopped.
  pub fn edit(&self, text: impl Into<String>) -> bool {
    self.edits.send(text.into()).is_ok()
  }
}

async fn debounce_loop(
  linter: Arc<Linter>,
  window: Duration,
  mut edits: mpsc::UnboundedReceiver<String>,
  results: mpsc::UnboundedSender<LintResult>,
  cancel: CancellationToken,
) {
  let mut pending: Option<String> = None;
  let mut in_flight: Option<JoinHandle<LintResult>> = None;
  let timer = tokio::time::sleep(window);
  tokio::pin!(timer);

  loop {
    tokio::select! {
      _ = cancel.cancelled() => break,

      edit = edits.recv() => {
        let Some(text) = edit else { break };
        if let Some(superseded) = in_flight.take() {
          superseded.abort();
        }
        pending = Some(text);
        timer.as_mut().reset(Instant::now() + window);
      }

      _ = &mut timer, if pending.is_some() => {
        if let Some(text) = pending.take() {
          let linter = linter.clone();
          in_flight = Some(tokio::task::spawn_blocking(move || linter.lint(&text, None)));
        }
      }

      finished = wait_for(&mut in_flight), if in_flight.is_some() => {
        in_flight = None;
        match finished {
          Ok(result) => {
            if results.send(result).is_err() {
              break;
            }
          }
          Err(e) if e.is_cancelled() => {}
          Err(e) => warn!(error = %e, "lint_task_failed"),
        }
      }
    }
  }

  if let Some(handle) = in_flight {
    handle.abort();
  }
}

async fn wait_for(handle: &mut Option<JoinHandle<LintResult>>) -> Result<LintResult, JoinError> {
  match handle {
    Some(handle) => handle.await,
    None => std::future::pending().await,
  }
}
