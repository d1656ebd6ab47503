use std::time::Duration;

use serde_json::{Map, Value};

/// Execution limits and defaults for a [`crate::Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Retries after the first attempt of an idempotent stage.
  pub max_retries: u32,
  /// Delay before the first retry; doubled for each further attempt.
  pub backoff_base: Duration,
  pub backoff_max: Duration,
  /// Deadline for one stage invocation, unless the stage's `timeoutMs`
  /// parameter or the `stageTimeoutMs` option says otherwise.
  pub stage_timeout: Duration,
  /// Shard size in bytes, unless the stage's or the pipeline's `shardSize`
  /// says otherwise.
  pub shard_size: usize,
  /// Fan-in limit for composing shard outputs. Defaults to the store's.
  pub max_compose_sources: Option<usize>,
  /// Upper bound on the shards one stage may be split into.
  pub max_shards: usize,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      backoff_base: Duration::from_secs(1),
      backoff_max: Duration::from_secs(60),
      stage_timeout: Duration::from_secs(30 * 60),
      shard_size: 64 * 1024 * 1024,
      max_compose_sources: None,
      max_shards: 1024,
    }
  }
}

impl RuntimeConfig {
  /// Deadline for a stage: `timeoutMs` param, then `stageTimeoutMs` option.
  pub fn stage_timeout_for(&self, params: &Map<String, Value>, options: &Map<String, Value>) -> Duration {
    params
      .get("timeoutMs")
      .or_else(|| options.get("stageTimeoutMs"))
      .and_then(Value::as_u64)
      .map(Duration::from_millis)
      .unwrap_or(self.stage_timeout)
  }

  /// Shard size for a stage: `shardSize` param, then `shardSize` option.
  pub fn shard_size_for(&self, params: &Map<String, Value>, options: &Map<String, Value>) -> usize {
    params
      .get("shardSize")
      .or_else(|| options.get("shardSize"))
      .and_then(Value::as_u64)
      .and_then(|size| usize::try_from(size).ok())
      .filter(|size| *size > 0)
      .unwrap_or(self.shard_size)
  }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`.
pub fn compute_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
  let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
  base.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let base = Duration::from_millis(100);
    let max = Duration::from_secs(1);
    assert_eq!(compute_backoff(base, max, 1), Duration::from_millis(100));
    assert_eq!(compute_backoff(base, max, 2), Duration::from_millis(200));
    assert_eq!(compute_backoff(base, max, 4), Duration::from_millis(800));
    assert_eq!(compute_backoff(base, max, 5), max);
    assert_eq!(compute_backoff(base, max, 100), max);
  }

  #[test]
  fn test_overrides() {
    let config = RuntimeConfig::default();
    let params = json!({"timeoutMs": 250, "shardSize": 10});
    let options = json!({"stageTimeoutMs": 500, "shardSize": 20});
    let params = params.as_object().unwrap();
    let options = options.as_object().unwrap();
    let empty = Map::new();

    assert_eq!(config.stage_timeout_for(params, options), Duration::from_millis(250));
    assert_eq!(config.stage_timeout_for(&empty, options), Duration::from_millis(500));
    assert_eq!(config.stage_timeout_for(&empty, &empty), config.stage_timeout);
    assert_eq!(config.shard_size_for(params, options), 10);
    assert_eq!(config.shard_size_for(&empty, options), 20);
    assert_eq!(config.shard_size_for(&empty, &empty), config.shard_size);
  }
}
