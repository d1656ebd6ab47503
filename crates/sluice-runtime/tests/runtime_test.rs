//! Integration tests for Runtime::invoke.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use sluice_config::PipelineConfig;
use sluice_resolver::WiringResolver;
use sluice_runtime::{
  ChannelNotifier, RunError, RunEvent, RunState, Runtime, RuntimeConfig, ShardError, StageFailure,
};
use sluice_stage::{Arity, Stage, StageContext, StageError, StageMetadata, StageRegistry};
use sluice_storage::{DEFAULT_CONTENT_TYPE, LocationAllocator, MemoryStore, read_all, write_all};
use sluice_workflow::WiredGraph;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static ATTEMPTS: LazyLock<Mutex<HashMap<String, u32>>> = LazyLock::new(Default::default);
static FINISHED: LazyLock<Mutex<Vec<String>>> = LazyLock::new(Default::default);

fn key(ctx: &StageContext) -> String {
  format!("{}/{}", ctx.run_id, ctx.stage_id)
}

fn finished(run_id: &str) -> Vec<String> {
  let prefix = format!("{run_id}/");
  let mut stages: Vec<String> = FINISHED
    .lock()
    .unwrap()
    .iter()
    .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
    .collect();
  stages.sort();
  stages
}

/// Fails transiently `failures` times, then succeeds.
struct Flaky;

#[async_trait]
impl Stage for Flaky {
  fn describe(&self) -> &'static str {
    "Fails transiently a configured number of times."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal().idempotent()
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let failures = ctx.params.get("failures").and_then(Value::as_u64).unwrap_or(0) as u32;
    let attempt = {
      let mut attempts = ATTEMPTS.lock().unwrap();
      let count = attempts.entry(key(&ctx)).or_insert(0);
      *count += 1;
      *count
    };
    if attempt <= failures {
      return Err(StageError::transient(format!("attempt {attempt} failed")));
    }
    Ok(())
  }
}

/// Always fails transiently, and is not safe to retry.
struct Fragile;

#[async_trait]
impl Stage for Fragile {
  fn describe(&self) -> &'static str {
    "Not idempotent."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal()
  }

  async fn run(&self, _ctx: StageContext) -> Result<(), StageError> {
    Err(StageError::transient("connection reset"))
  }
}

struct Broken;

#[async_trait]
impl Stage for Broken {
  fn describe(&self) -> &'static str {
    "Always fails."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal().idempotent()
  }

  async fn run(&self, _ctx: StageContext) -> Result<(), StageError> {
    Err(StageError::permanent("bad input"))
  }
}

/// Sleeps for `sleepMs` (or until cancelled), then records that it finished.
struct Slow;

#[async_trait]
impl Stage for Slow {
  fn describe(&self) -> &'static str {
    "Sleeps."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal()
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let sleep = ctx.params.get("sleepMs").and_then(Value::as_u64).unwrap_or(0);
    tokio::select! {
      _ = ctx.cancel.cancelled() => return Err(StageError::Cancelled),
      _ = tokio::time::sleep(Duration::from_millis(sleep)) => {}
    }
    FINISHED.lock().unwrap().push(key(&ctx));
    Ok(())
  }
}

/// Copies its source to its sink, failing on any input containing `boom`.
struct Tripwire;

#[async_trait]
impl Stage for Tripwire {
  fn describe(&self) -> &'static str {
    "Copies data."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default()
      .with_sources(Arity::Exactly(1))
      .idempotent()
      .shardable()
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let data = ctx.read_source(0).await?;
    if data.windows(4).any(|w| w == b"boom") {
      return Err(StageError::permanent("tripped"));
    }
    write_all(ctx.store.as_ref(), ctx.sink(0)?, data, DEFAULT_CONTENT_TYPE).await?;
    Ok(())
  }
}

/// Copies its byte range, finishing later the earlier its shard is.
struct Reverse;

#[async_trait]
impl Stage for Reverse {
  fn describe(&self) -> &'static str {
    "Copies data slowly."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default()
      .with_sources(Arity::Exactly(1))
      .shardable()
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let delay = ctx.shard.map_or(0, |shard| 10 * 20u64.saturating_sub(shard as u64));
    tokio::time::sleep(Duration::from_millis(delay)).await;
    let data = ctx.read_source(0).await?;
    write_all(ctx.store.as_ref(), ctx.sink(0)?, data, DEFAULT_CONTENT_TYPE).await?;
    FINISHED
      .lock()
      .unwrap()
      .push(format!("{}/shard-{}", ctx.run_id, ctx.shard.unwrap_or_default()));
    Ok(())
  }
}

fn registry() -> Arc<StageRegistry> {
  let registry = sluice_stages::builtins()
    .register("Flaky", || Arc::new(Flaky))
    .register("Fragile", || Arc::new(Fragile))
    .register("Broken", || Arc::new(Broken))
    .register("Slow", || Arc::new(Slow))
    .register("Tripwire", || Arc::new(Tripwire))
    .register("Reverse", || Arc::new(Reverse))
    .build()
    .unwrap();
  Arc::new(registry)
}

fn wire(config: Value, run_id: &str) -> WiredGraph {
  let config = PipelineConfig::from_value(config).unwrap();
  let allocator = LocationAllocator::new(format!("store://sluice/runs/{run_id}"));
  WiringResolver::new(registry())
    .resolve(&config, run_id, &allocator)
    .unwrap()
}

fn test_config() -> RuntimeConfig {
  RuntimeConfig {
    backoff_base: Duration::from_millis(1),
    backoff_max: Duration::from_millis(5),
    ..RuntimeConfig::default()
  }
}

fn runtime(store: Arc<MemoryStore>, config: RuntimeConfig) -> Runtime {
  Runtime::new(registry(), store, config)
}

fn drain(receiver: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
  let mut events = Vec::new();
  while let Ok(event) = receiver.try_recv() {
    events.push(event);
  }
  events
}

#[tokio::test]
async fn test_file_pipeline_end_to_end() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("in.csv");
  let output = dir.path().join("out/result.csv");
  std::fs::write(&input, "a,1\nb,2\nc,3\n").unwrap();

  let graph = wire(
    json!({
      "inputs": [{"type": "FileInput", "path": input.to_str().unwrap()}],
      "transforms": [{"type": "MatchReplace", "pattern": "^(\\w+),", "replacement": "$1;"}],
      "outputs": [{"type": "FileOutput", "path": output.to_str().unwrap()}]
    }),
    "run-e2e",
  );

  let (sender, mut receiver) = mpsc::unbounded_channel();
  let runtime = runtime(Arc::new(MemoryStore::new()), test_config())
    .with_notifier(Arc::new(ChannelNotifier::new(sender)));
  let report = runtime.invoke(&graph, CancellationToken::new()).await.unwrap();

  assert_eq!(std::fs::read_to_string(&output).unwrap(), "a;1\nb;2\nc;3\n");
  assert_eq!(report.state, RunState::Succeeded);
  let ids: Vec<_> = report.stages.iter().map(|s| s.stage_id.as_str()).collect();
  assert_eq!(ids, vec!["inputs[0]", "transforms[0]", "outputs[0]"]);
  assert!(report.stages.iter().all(|s| s.attempts == 1 && s.shards.is_none()));

  let events = drain(&mut receiver);
  assert!(matches!(events.first(), Some(RunEvent::RunStarted { .. })));
  assert!(matches!(events.last(), Some(RunEvent::RunCompleted { .. })));
  assert!(events.iter().all(|e| e.run_id() == "run-e2e"));
  let phases = events
    .iter()
    .filter(|e| matches!(e, RunEvent::PhaseStarted { .. }))
    .count();
  assert_eq!(phases, 3);
}

#[tokio::test]
async fn test_transient_failures_within_bound_are_retried() {
  let graph = wire(
    json!({"inputs": [{"type": "Flaky", "failures": 2}]}),
    "run-retry-ok",
  );
  let report = runtime(Arc::new(MemoryStore::new()), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.stage("inputs[0]").unwrap().attempts, 3);
}

#[tokio::test]
async fn test_failures_equal_to_retry_budget_succeed() {
  let graph = wire(
    json!({"inputs": [{"type": "Flaky", "failures": 3}]}),
    "run-retry-edge-ok",
  );
  let config = RuntimeConfig {
    max_retries: 3,
    ..test_config()
  };
  let report = runtime(Arc::new(MemoryStore::new()), config)
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.state, RunState::Succeeded);
  assert_eq!(report.stage("inputs[0]").unwrap().attempts, 4);
}

#[tokio::test]
async fn test_one_failure_past_retry_budget_fails() {
  let graph = wire(
    json!({"inputs": [{"type": "Flaky", "failures": 4}]}),
    "run-retry-edge-fail",
  );
  let config = RuntimeConfig {
    max_retries: 3,
    ..test_config()
  };
  let err = runtime(Arc::new(MemoryStore::new()), config)
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match err {
    RunError::StageFailed {
      attempts,
      source: StageFailure::Stage(source),
      ..
    } => {
      assert_eq!(attempts, 4);
      assert_eq!(source.to_string(), "attempt 4 failed");
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn test_retries_are_bounded() {
  let graph = wire(
    json!({"inputs": [{"type": "Flaky", "failures": 10}]}),
    "run-retry-exhausted",
  );
  let config = RuntimeConfig {
    max_retries: 2,
    ..test_config()
  };
  let err = runtime(Arc::new(MemoryStore::new()), config)
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match err {
    RunError::StageFailed {
      stage_id,
      attempts,
      source: StageFailure::Stage(source),
      ..
    } => {
      assert_eq!(stage_id, "inputs[0]");
      assert_eq!(attempts, 3);
      assert!(source.is_transient());
    }
    other => panic!("unexpected error: {other}"),
  }
}

#[tokio::test]
async fn test_non_idempotent_stage_is_not_retried() {
  let graph = wire(json!({"inputs": [{"type": "Fragile"}]}), "run-fragile");
  let err = runtime(Arc::new(MemoryStore::new()), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(err, RunError::StageFailed { attempts: 1, .. }));
}

#[tokio::test]
async fn test_phase_failure_stops_later_phases() {
  let graph = wire(
    json!({
      "inputs": [
        {"type": "Broken"},
        {"type": "Slow", "sleepMs": 50}
      ],
      "outputs": [{"type": "Slow"}]
    }),
    "run-phase-failure",
  );
  let (sender, mut receiver) = mpsc::unbounded_channel();
  let err = runtime(Arc::new(MemoryStore::new()), test_config())
    .with_notifier(Arc::new(ChannelNotifier::new(sender)))
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match &err {
    RunError::StageFailed {
      stage_id,
      stage_type,
      attempts,
      ..
    } => {
      assert_eq!(stage_id, "inputs[0]");
      assert_eq!(stage_type, "Broken");
      assert_eq!(*attempts, 1);
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(finished("run-phase-failure"), vec!["inputs[1]"]);

  let events = drain(&mut receiver);
  assert!(matches!(events.last(), Some(RunEvent::RunFailed { .. })));
  assert!(
    !events
      .iter()
      .any(|e| matches!(e, RunEvent::StageStarted { stage_id, .. } if stage_id == "outputs[0]"))
  );
}

#[tokio::test]
async fn test_stage_timeout() {
  let graph = wire(
    json!({"inputs": [{"type": "Slow", "sleepMs": 10_000, "timeoutMs": 50}]}),
    "run-timeout",
  );
  let err = runtime(Arc::new(MemoryStore::new()), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match err {
    RunError::StageFailed {
      source: StageFailure::Stage(StageError::Timeout { timeout_ms }),
      ..
    } => assert_eq!(timeout_ms, 50),
    other => panic!("unexpected error: {other}"),
  }
  assert!(finished("run-timeout").is_empty());
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
  let graph = wire(
    json!({
      "inputs": [{"type": "Slow", "sleepMs": 10_000}],
      "outputs": [{"type": "Slow"}]
    }),
    "run-cancel",
  );
  let cancel = CancellationToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.cancel();
  });

  let err = runtime(Arc::new(MemoryStore::new()), test_config())
    .invoke(&graph, cancel)
    .await
    .unwrap_err();

  assert!(matches!(err, RunError::Cancelled));
  assert!(finished("run-cancel").is_empty());
}

#[tokio::test]
async fn test_conflicting_writers_are_rejected_before_running() {
  let mut graph = wire(
    json!({
      "inputs": [
        {"type": "FileInput", "path": "/nonexistent/a", "sinks": ["store://data/a"]},
        {"type": "FileInput", "path": "/nonexistent/b", "sinks": ["store://data/b"]}
      ]
    }),
    "run-conflict",
  );
  graph.inputs[1].sinks = vec!["store://data/a".to_string()];

  let err = runtime(Arc::new(MemoryStore::new()), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match err {
    RunError::InvalidGraph { message } => assert!(message.contains("store://data/a")),
    other => panic!("unexpected error: {other}"),
  }
}

fn records(count: usize) -> String {
  (0..count).map(|i| format!("key{i},value{i}\n")).collect()
}

#[tokio::test]
async fn test_sharded_output_matches_unsharded() {
  let source = records(40);
  let expected: String = (0..40).map(|i| format!("key{i};value{i}\n")).collect();

  let store = Arc::new(MemoryStore::new().with_max_compose_sources(3));
  write_all(
    store.as_ref(),
    "store://data/in.csv",
    Bytes::from(source.clone()),
    DEFAULT_CONTENT_TYPE,
  )
  .await
  .unwrap();

  let graph = wire(
    json!({
      "transforms": [{
        "type": "MatchReplace",
        "pattern": "^(\\w+),",
        "replacement": "$1;",
        "shardSize": 64,
        "sources": ["store://data/in.csv"],
        "sinks": ["store://data/out.csv"]
      }]
    }),
    "run-sharded",
  );
  let report = runtime(store.clone(), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap();

  let output = read_all(store.as_ref(), "store://data/out.csv").await.unwrap();
  assert_eq!(std::str::from_utf8(&output).unwrap(), expected);

  let outcome = report.stage("transforms[0]").unwrap();
  assert!(outcome.shards.unwrap() >= source.len().div_ceil(64));
  assert_eq!(outcome.attempts, 1);

  let locations = store.locations().await;
  assert_eq!(locations, vec!["store://data/in.csv", "store://data/out.csv"]);
}

#[tokio::test]
async fn test_small_source_is_not_sharded() {
  let store = Arc::new(MemoryStore::new());
  write_all(
    store.as_ref(),
    "store://data/in.csv",
    Bytes::from(records(3)),
    DEFAULT_CONTENT_TYPE,
  )
  .await
  .unwrap();

  let graph = wire(
    json!({
      "transforms": [{
        "type": "Tripwire",
        "sources": ["store://data/in.csv"],
        "sinks": ["store://data/out.csv"]
      }]
    }),
    "run-unsharded",
  );
  let report = runtime(store.clone(), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap();

  assert_eq!(report.stage("transforms[0]").unwrap().shards, None);
  let output = read_all(store.as_ref(), "store://data/out.csv").await.unwrap();
  assert_eq!(output, Bytes::from(records(3)));
}

#[tokio::test]
async fn test_shard_failure_fails_stage_and_cleans_up() {
  let mut source = records(20);
  source.push_str("boom\n");
  source.push_str(&records(20));

  let store = Arc::new(MemoryStore::new());
  write_all(
    store.as_ref(),
    "store://data/in.csv",
    Bytes::from(source),
    DEFAULT_CONTENT_TYPE,
  )
  .await
  .unwrap();

  let graph = wire(
    json!({
      "transforms": [{
        "type": "Tripwire",
        "shardSize": 32,
        "sources": ["store://data/in.csv"],
        "sinks": ["store://data/out.csv"]
      }]
    }),
    "run-shard-failure",
  );
  let err = runtime(store.clone(), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  match err {
    RunError::StageFailed {
      attempts,
      source: StageFailure::Shard(ShardError::ShardFailed { source, .. }),
      ..
    } => {
      assert_eq!(attempts, 1);
      assert_eq!(source.to_string(), "tripped");
    }
    other => panic!("unexpected error: {other}"),
  }
  assert_eq!(store.locations().await, vec!["store://data/in.csv"]);
}

#[tokio::test]
async fn test_too_many_shards() {
  let store = Arc::new(MemoryStore::new());
  write_all(
    store.as_ref(),
    "store://data/in.csv",
    Bytes::from(records(50)),
    DEFAULT_CONTENT_TYPE,
  )
  .await
  .unwrap();

  let graph = wire(
    json!({
      "transforms": [{
        "type": "Tripwire",
        "shardSize": 8,
        "sources": ["store://data/in.csv"],
        "sinks": ["store://data/out.csv"]
      }]
    }),
    "run-shard-limit",
  );
  let config = RuntimeConfig {
    max_shards: 4,
    ..test_config()
  };
  let err = runtime(store.clone(), config)
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    RunError::StageFailed {
      source: StageFailure::Shard(ShardError::CompositionLimit { limit: 4, .. }),
      ..
    }
  ));
  assert_eq!(store.locations().await, vec!["store://data/in.csv"]);
}

#[tokio::test]
async fn test_shards_finishing_out_of_order_compose_in_order() {
  let source = records(40);
  let store = Arc::new(MemoryStore::new().with_max_compose_sources(3));
  write_all(
    store.as_ref(),
    "store://data/in.csv",
    Bytes::from(source.clone()),
    DEFAULT_CONTENT_TYPE,
  )
  .await
  .unwrap();

  let graph = wire(
    json!({
      "transforms": [{
        "type": "Reverse",
        "shardSize": 48,
        "sources": ["store://data/in.csv"],
        "sinks": ["store://data/out.csv"]
      }]
    }),
    "run-reverse",
  );
  let report = runtime(store.clone(), test_config())
    .invoke(&graph, CancellationToken::new())
    .await
    .unwrap();

  let shards = report.stage("transforms[0]").unwrap().shards.unwrap();
  assert!(shards >= 10);

  let completion: Vec<usize> = FINISHED
    .lock()
    .unwrap()
    .iter()
    .filter_map(|k| k.strip_prefix("run-reverse/shard-"))
    .map(|shard| shard.parse().unwrap())
    .collect();
  assert_eq!(completion.len(), shards);
  assert_eq!(completion.first(), Some(&(shards - 1)));
  assert_eq!(completion.last(), Some(&0));

  let output = read_all(store.as_ref(), "store://data/out.csv").await.unwrap();
  assert_eq!(std::str::from_utf8(&output).unwrap(), source);
  assert_eq!(
    store.locations().await,
    vec!["store://data/in.csv", "store://data/out.csv"]
  );
}
