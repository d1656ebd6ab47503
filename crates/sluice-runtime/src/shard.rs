//! Record-aligned sharding of a single stage invocation.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sluice_stage::{Stage, StageContext, StageError};
use sluice_storage::{
  DEFAULT_CONTENT_TYPE, LocationAllocator, StorageError, Store, compose_ordered, delete_if_exists,
  read_range,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::ShardError;

/// Bytes read per request while searching for a record boundary.
const BOUNDARY_WINDOW: u64 = 64 * 1024;

/// Split the `len` bytes stored at `location` into ranges of roughly `hint`
/// bytes.
///
/// The shard count is `ceil(len / hint)` and the target size is spread
/// evenly across it. Each boundary is moved back to just after the last
/// newline before it so no record is split; a record longer than the target
/// becomes a shard of its own. The ranges cover the object exactly, in order.
///
/// Only the bytes around each boundary are read.
pub async fn partition(
  store: &dyn Store,
  location: &str,
  len: u64,
  hint: u64,
) -> Result<Vec<Range<u64>>, StorageError> {
  partition_with_window(store, location, len, hint, BOUNDARY_WINDOW).await
}

async fn partition_with_window(
  store: &dyn Store,
  location: &str,
  len: u64,
  hint: u64,
  window: u64,
) -> Result<Vec<Range<u64>>, StorageError> {
  if len == 0 {
    return Ok(Vec::new());
  }
  let hint = hint.max(1);
  let window = window.max(1);
  let count = len.div_ceil(hint);
  let target = len.div_ceil(count);

  let mut ranges = Vec::new();
  let mut start = 0;
  while start < len {
    let mut end = (start + target).min(len);
    if end < len {
      end = match last_newline(store, location, start..end, window).await? {
        Some(newline) => newline + 1,
        None => match next_newline(store, location, end..len, window).await? {
          Some(newline) => newline + 1,
          None => len,
        },
      };
    }
    ranges.push(start..end);
    start = end;
  }
  Ok(ranges)
}

/// Offset of the last newline in `range`, reading backwards from its end.
async fn last_newline(
  store: &dyn Store,
  location: &str,
  range: Range<u64>,
  window: u64,
) -> Result<Option<u64>, StorageError> {
  let mut end = range.end;
  while end > range.start {
    let from = end.saturating_sub(window).max(range.start);
    let chunk = read_range(store, location, from..end).await?;
    if let Some(i) = chunk.iter().rposition(|b| *b == b'\n') {
      return Ok(Some(from + i as u64));
    }
    end = from;
  }
  Ok(None)
}

/// Offset of the first newline in `range`.
async fn next_newline(
  store: &dyn Store,
  location: &str,
  range: Range<u64>,
  window: u64,
) -> Result<Option<u64>, StorageError> {
  let mut start = range.start;
  while start < range.end {
    let to = (start + window).min(range.end);
    let chunk = read_range(store, location, start..to).await?;
    if let Some(i) = chunk.iter().position(|b| *b == b'\n') {
      return Ok(Some(start + i as u64));
    }
    if chunk.is_empty() {
      break;
    }
    start = to;
  }
  Ok(None)
}

/// One shard of a stage's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardDescriptor {
  pub index: usize,
  /// Byte range of the source object.
  pub start: u64,
  pub end: u64,
  /// Where the stage writes the shard's result.
  pub output: String,
}

/// The shards of one sharded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardManifest {
  /// The stage sink the shard outputs are composed into.
  pub target: String,
  pub shards: Vec<ShardDescriptor>,
}

impl ShardManifest {
  fn new(target: &str, ranges: Vec<Range<u64>>) -> Self {
    let shards = ranges
      .into_iter()
      .enumerate()
      .map(|(index, range)| ShardDescriptor {
        index,
        start: range.start,
        end: range.end,
        output: format!("{target}.shards/{index:05}.out"),
      })
      .collect();
    Self {
      target: target.to_string(),
      shards,
    }
  }

  pub fn outputs(&self) -> Vec<String> {
    self.shards.iter().map(|s| s.output.clone()).collect()
  }

  /// Every temporary this manifest owns.
  pub fn temporaries(&self) -> impl Iterator<Item = &str> {
    self.shards.iter().map(|s| s.output.as_str())
  }
}

/// A decision to shard `source` along the manifest's byte ranges.
#[derive(Debug, Clone)]
pub struct ShardPlan {
  pub source: String,
  pub manifest: ShardManifest,
}

impl ShardPlan {
  pub fn shard_count(&self) -> usize {
    self.manifest.shards.len()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSummary {
  pub shards: usize,
  pub compose_calls: usize,
}

/// Runs a stage once per shard and composes the results in shard order.
#[derive(Clone)]
pub struct ShardCoordinator {
  store: Arc<dyn Store>,
  max_compose_sources: usize,
  max_shards: usize,
}

impl ShardCoordinator {
  pub fn new(store: Arc<dyn Store>, config: &RuntimeConfig) -> Self {
    let max_compose_sources = config
      .max_compose_sources
      .unwrap_or_else(|| store.max_compose_sources());
    Self {
      store,
      max_compose_sources,
      max_shards: config.max_shards,
    }
  }

  /// Decide from its size whether `source` is large enough to shard.
  ///
  /// Returns `None` when the source fits in one shard.
  pub async fn plan(
    &self,
    source: &str,
    target: &str,
    hint: usize,
  ) -> Result<Option<ShardPlan>, ShardError> {
    let hint = u64::try_from(hint).unwrap_or(u64::MAX);
    let len = self.store.size(source).await?;
    if len <= hint {
      return Ok(None);
    }

    let ranges = partition(self.store.as_ref(), source, len, hint).await?;
    debug!(source = %source, len, shards = ranges.len(), "shards_planned");
    let manifest = ShardManifest::new(target, ranges);
    if manifest.shards.len() > self.max_shards {
      return Err(ShardError::CompositionLimit {
        shard_count: manifest.shards.len(),
        limit: self.max_shards,
      });
    }
    if manifest.shards.len() < 2 {
      return Ok(None);
    }
    Ok(Some(ShardPlan {
      source: source.to_string(),
      manifest,
    }))
  }

  /// Run `stage` over every shard of `plan` concurrently and compose the
  /// outputs into the plan's target.
  ///
  /// Each shard reads its own byte range of the source. Any shard failure
  /// cancels the remaining shards. Shard outputs are deleted whether the run
  /// succeeds or not.
  pub async fn run_sharded(
    &self,
    stage: Arc<dyn Stage>,
    ctx: &StageContext,
    plan: ShardPlan,
    deadline: Duration,
  ) -> Result<ShardSummary, ShardError> {
    let result = self.execute(stage, ctx, &plan, deadline).await;
    self.cleanup(&plan.manifest).await;
    result
  }

  async fn execute(
    &self,
    stage: Arc<dyn Stage>,
    ctx: &StageContext,
    plan: &ShardPlan,
    deadline: Duration,
  ) -> Result<ShardSummary, ShardError> {
    let manifest = &plan.manifest;
    if ctx.cancel.is_cancelled() {
      return Err(ShardError::Cancelled);
    }

    let shards_cancel = ctx.cancel.child_token();
    let mut tasks = JoinSet::new();
    for shard in &manifest.shards {
      let stage = stage.clone();
      let shard_ctx = StageContext {
        shard: Some(shard.index),
        sources: vec![plan.source.clone()],
        sinks: vec![shard.output.clone()],
        range: Some(shard.start..shard.end),
        cancel: shards_cancel.child_token(),
        ..ctx.clone()
      };
      let index = shard.index;
      info!(stage_id = %ctx.stage_id, shard = index, "shard_started");
      tasks.spawn(async move { (index, run_shard(stage, shard_ctx, deadline).await) });
    }

    let failure = collect_shards(&mut tasks, &ctx.cancel, &shards_cancel).await;
    if let Some(failure) = failure {
      return Err(failure);
    }

    let scratch = LocationAllocator::new(format!("{}.shards/compose", manifest.target));
    let outputs = manifest.outputs();
    let summary = compose_ordered(
      self.store.as_ref(),
      &outputs,
      &manifest.target,
      DEFAULT_CONTENT_TYPE,
      &scratch,
      self.max_compose_sources,
    )
    .await
    .map_err(|e| match e {
      StorageError::TooManySources { limit, .. } => ShardError::CompositionLimit {
        shard_count: outputs.len(),
        limit,
      },
      other => ShardError::Storage(other),
    })?;

    info!(
      stage_id = %ctx.stage_id,
      shards = outputs.len(),
      compose_calls = summary.calls,
      "shards_composed"
    );
    Ok(ShardSummary {
      shards: outputs.len(),
      compose_calls: summary.calls,
    })
  }

  async fn cleanup(&self, manifest: &ShardManifest) {
    for location in manifest.temporaries() {
      if let Err(e) = delete_if_exists(self.store.as_ref(), location).await {
        warn!(location = %location, error = %e, "failed to delete shard temporary");
      }
    }
  }
}

async fn run_shard(stage: Arc<dyn Stage>, ctx: StageContext, deadline: Duration) -> Result<(), StageError> {
  match tokio::time::timeout(deadline, stage.run(ctx)).await {
    Ok(result) => result,
    Err(_) => Err(StageError::Timeout {
      timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
    }),
  }
}

/// Wait for every shard. Returns the first failure, after cancelling and
/// aborting the shards still running.
async fn collect_shards(
  tasks: &mut JoinSet<(usize, Result<(), StageError>)>,
  run_cancel: &CancellationToken,
  shards_cancel: &CancellationToken,
) -> Option<ShardError> {
  loop {
    let joined = tokio::select! {
      biased;
      _ = run_cancel.cancelled() => {
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        return Some(ShardError::Cancelled);
      }
      joined = tasks.join_next() => joined,
    };

    let failure = match joined? {
      Ok((_, Ok(()))) => continue,
      Ok((shard, Err(source))) => ShardError::ShardFailed { shard, source },
      Err(e) if e.is_cancelled() => continue,
      Err(e) => ShardError::TaskFailed {
        message: e.to_string(),
      },
    };

    shards_cancel.cancel();
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    return Some(failure);
  }
}
