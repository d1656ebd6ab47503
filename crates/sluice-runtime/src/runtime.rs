//! Pipeline runtime.
//!
//! The [`Runtime`] is the entry point for executing wired pipelines. It owns
//! the stage registry, the store and the execution limits, and provides
//! `invoke(graph, cancel)` to run every phase of a [`WiredGraph`].

use std::sync::Arc;
use std::time::Duration;

use sluice_config::Phase;
use sluice_stage::{Stage, StageContext, StageError, StageRegistry};
use sluice_storage::Store;
use sluice_workflow::{Graph, WiredGraph, WiredStage};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::config::{RuntimeConfig, compute_backoff};
use crate::error::{RunError, StageFailure};
use crate::events::{ExecutionNotifier, NoopNotifier, RunEvent};
use crate::result::{RunReport, StageOutcome};
use crate::shard::ShardCoordinator;
use crate::state::RunState;

/// Executes wired pipelines.
///
/// Phases run in order; the stages of a phase run concurrently, one task
/// each, and the next phase starts only once all of them have finished. The
/// first stage failure fails the run: siblings already running finish, but
/// no later phase starts.
pub struct Runtime {
  registry: Arc<StageRegistry>,
  store: Arc<dyn Store>,
  config: Arc<RuntimeConfig>,
  notifier: Arc<dyn ExecutionNotifier>,
}

impl Runtime {
  pub fn new(registry: Arc<StageRegistry>, store: Arc<dyn Store>, config: RuntimeConfig) -> Self {
    Self {
      registry,
      store,
      config: Arc::new(config),
      notifier: Arc::new(NoopNotifier),
    }
  }

  /// Publish run events to `notifier`.
  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Execute every phase of `graph`.
  #[instrument(name = "runtime_invoke", skip(self, graph, cancel), fields(run_id = %graph.run_id))]
  pub async fn invoke(
    &self,
    graph: &WiredGraph,
    cancel: CancellationToken,
  ) -> Result<RunReport, RunError> {
    let run_id = graph.run_id.clone();
    let mut state = RunState::Pending.transition(RunState::Running)?;

    info!(run_id = %run_id, stages = graph.stage_count(), "run_started");
    self.notifier.notify(RunEvent::RunStarted {
      run_id: run_id.clone(),
    });

    let result = self.run_phases(graph, &cancel).await;

    match result {
      Ok(stages) => {
        state = state.transition(RunState::Succeeded)?;
        info!(run_id = %run_id, "run_completed");
        self.notifier.notify(RunEvent::RunCompleted {
          run_id: run_id.clone(),
        });
        Ok(RunReport {
          run_id,
          state,
          stages,
        })
      }
      Err(e) => {
        state.transition(RunState::Failed)?;
        error!(run_id = %run_id, error = %e, "run_failed");
        self.notifier.notify(RunEvent::RunFailed {
          run_id,
          error: e.to_string(),
        });
        Err(e)
      }
    }
  }

  async fn run_phases(
    &self,
    graph: &WiredGraph,
    cancel: &CancellationToken,
  ) -> Result<Vec<StageOutcome>, RunError> {
    let stages = self.validate(graph)?;

    let mut outcomes = Vec::with_capacity(graph.stage_count());
    for phase in Phase::ALL {
      let phase_stages: Vec<_> = stages
        .iter()
        .filter(|(stage, _)| stage.phase == phase)
        .cloned()
        .collect();
      if phase_stages.is_empty() {
        continue;
      }
      if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
      }

      info!(run_id = %graph.run_id, phase = %phase, stages = phase_stages.len(), "phase_started");
      self.notifier.notify(RunEvent::PhaseStarted {
        run_id: graph.run_id.clone(),
        phase,
      });

      outcomes.extend(self.run_phase(graph, phase_stages, cancel).await?);
    }
    Ok(outcomes)
  }

  /// Check the graph and instantiate every stage before anything runs.
  fn validate(&self, graph: &WiredGraph) -> Result<Vec<(WiredStage, Arc<dyn Stage>)>, RunError> {
    let edges = Graph::new(graph);
    if let Some((location, writers)) = edges.conflicting_writers().first() {
      return Err(RunError::InvalidGraph {
        message: format!(
          "location '{location}' is written by more than one stage: {}",
          writers.join(", ")
        ),
      });
    }

    graph
      .stages()
      .map(|stage| {
        let implementation =
          self
            .registry
            .get(&stage.stage_type)
            .map_err(|e| RunError::InvalidGraph {
              message: format!("{}: {e}", stage.stage_id),
            })?;
        Ok((stage.clone(), implementation))
      })
      .collect()
  }

  async fn run_phase(
    &self,
    graph: &WiredGraph,
    stages: Vec<(WiredStage, Arc<dyn Stage>)>,
    cancel: &CancellationToken,
  ) -> Result<Vec<StageOutcome>, RunError> {
    let executor = StageExecutor {
      run_id: graph.run_id.clone(),
      store: self.store.clone(),
      config: self.config.clone(),
      notifier: self.notifier.clone(),
      coordinator: ShardCoordinator::new(self.store.clone(), &self.config),
    };

    let mut tasks = JoinSet::new();
    for (stage, implementation) in stages {
      let ctx = StageContext {
        run_id: graph.run_id.clone(),
        stage_id: stage.stage_id.clone(),
        shard: None,
        params: stage.params.clone(),
        options: graph.options.clone(),
        sources: stage.sources.clone(),
        sinks: stage.sinks.clone(),
        range: None,
        store: self.store.clone(),
        cancel: cancel.child_token(),
      };
      let executor = executor.clone();
      let span = info_span!("stage", stage_id = %stage.stage_id, stage_type = %stage.stage_type);
      tasks.spawn(async move { executor.execute(stage, implementation, ctx).await }.instrument(span));
    }

    let mut outcomes = Vec::new();
    let mut first_error = None;
    loop {
      let joined = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          tasks.abort_all();
          return Err(RunError::Cancelled);
        }
        joined = tasks.join_next() => joined,
      };

      match joined {
        None => break,
        Some(Ok(Ok(outcome))) => outcomes.push(outcome),
        Some(Ok(Err(e))) => {
          first_error.get_or_insert(e);
        }
        Some(Err(e)) => {
          first_error.get_or_insert(RunError::Internal {
            message: format!("stage task failed: {e}"),
          });
        }
      }
    }

    if let Some(e) = first_error {
      return Err(e);
    }
    outcomes.sort_by_key(|outcome: &StageOutcome| stage_index(&outcome.stage_id));
    Ok(outcomes)
  }
}

fn stage_index(stage_id: &str) -> usize {
  stage_id
    .rsplit_once('[')
    .and_then(|(_, rest)| rest.trim_end_matches(']').parse().ok())
    .unwrap_or(usize::MAX)
}

/// Everything a stage task needs, cheap to clone into each task.
#[derive(Clone)]
struct StageExecutor {
  run_id: String,
  store: Arc<dyn Store>,
  config: Arc<RuntimeConfig>,
  notifier: Arc<dyn ExecutionNotifier>,
  coordinator: ShardCoordinator,
}

impl StageExecutor {
  async fn execute(
    &self,
    stage: WiredStage,
    implementation: Arc<dyn Stage>,
    ctx: StageContext,
  ) -> Result<StageOutcome, RunError> {
    let metadata = implementation.metadata();
    let deadline = self.config.stage_timeout_for(&stage.params, &ctx.options);

    info!(stage_id = %stage.stage_id, stage_type = %stage.stage_type, "stage_started");
    self.notifier.notify(RunEvent::StageStarted {
      run_id: self.run_id.clone(),
      stage_id: stage.stage_id.clone(),
      stage_type: stage.stage_type.clone(),
    });

    if metadata.shardable && ctx.sources.len() == 1 && ctx.sinks.len() == 1 {
      let hint = self.config.shard_size_for(&stage.params, &ctx.options);
      let plan = self
        .coordinator
        .plan(&ctx.sources[0], &ctx.sinks[0], hint)
        .await;
      match plan {
        Ok(Some(plan)) => {
          return self.execute_sharded(stage, implementation, ctx, plan, deadline).await;
        }
        Ok(None) => {}
        Err(e) => return Err(self.failed(&stage, 1, StageFailure::Shard(e))),
      }
    }

    let mut attempt: u32 = 0;
    loop {
      attempt += 1;
      let result = match tokio::time::timeout(deadline, implementation.run(ctx.clone())).await {
        Ok(result) => result,
        Err(_) => Err(StageError::Timeout {
          timeout_ms: millis(deadline),
        }),
      };

      match result {
        Ok(()) => return Ok(self.completed(&stage, attempt, None)),
        Err(StageError::Cancelled) if ctx.cancel.is_cancelled() => return Err(RunError::Cancelled),
        Err(e) if metadata.idempotent && e.is_transient() && attempt <= self.config.max_retries => {
          let delay = compute_backoff(self.config.backoff_base, self.config.backoff_max, attempt);
          warn!(
            stage_id = %stage.stage_id,
            attempt,
            max_retries = self.config.max_retries,
            delay_ms = millis(delay),
            error = %e,
            "stage_retrying"
          );
          self.notifier.notify(RunEvent::StageRetrying {
            run_id: self.run_id.clone(),
            stage_id: stage.stage_id.clone(),
            attempt,
            error: e.to_string(),
          });

          tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RunError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
          }
        }
        Err(e) => return Err(self.failed(&stage, attempt, StageFailure::Stage(e))),
      }
    }
  }

  async fn execute_sharded(
    &self,
    stage: WiredStage,
    implementation: Arc<dyn Stage>,
    ctx: StageContext,
    plan: crate::shard::ShardPlan,
    deadline: Duration,
  ) -> Result<StageOutcome, RunError> {
    let shards = plan.shard_count();
    info!(stage_id = %stage.stage_id, shards, "stage_sharded");
    self.notifier.notify(RunEvent::StageSharded {
      run_id: self.run_id.clone(),
      stage_id: stage.stage_id.clone(),
      shards,
    });

    match self
      .coordinator
      .run_sharded(implementation, &ctx, plan, deadline)
      .await
    {
      Ok(summary) => Ok(self.completed(&stage, 1, Some(summary.shards))),
      Err(crate::error::ShardError::Cancelled) => Err(RunError::Cancelled),
      Err(e) => Err(self.failed(&stage, 1, StageFailure::Shard(e))),
    }
  }

  fn completed(&self, stage: &WiredStage, attempts: u32, shards: Option<usize>) -> StageOutcome {
    info!(stage_id = %stage.stage_id, attempts, "stage_completed");
    self.notifier.notify(RunEvent::StageCompleted {
      run_id: self.run_id.clone(),
      stage_id: stage.stage_id.clone(),
      attempts,
    });
    StageOutcome {
      stage_id: stage.stage_id.clone(),
      phase: stage.phase,
      stage_type: stage.stage_type.clone(),
      attempts,
      shards,
    }
  }

  fn failed(&self, stage: &WiredStage, attempts: u32, source: StageFailure) -> RunError {
    error!(stage_id = %stage.stage_id, attempts, error = %source, "stage_failed");
    self.notifier.notify(RunEvent::StageFailed {
      run_id: self.run_id.clone(),
      stage_id: stage.stage_id.clone(),
      error: source.to_string(),
    });
    RunError::StageFailed {
      phase: stage.phase,
      stage_id: stage.stage_id.clone(),
      stage_type: stage.stage_type.clone(),
      attempts,
      source,
    }
  }
}

fn millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
