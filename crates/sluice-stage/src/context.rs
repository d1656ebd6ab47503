use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use sluice_storage::{Store, read_all, read_range};
use tokio_util::sync::CancellationToken;

use crate::error::StageError;

/// Everything a stage invocation receives.
#[derive(Clone)]
pub struct StageContext {
  pub run_id: String,
  /// Stable id within the run, e.g. `transforms[1]`.
  pub stage_id: String,
  /// Shard index when this invocation processes one shard of a larger input.
  pub shard: Option<usize>,
  /// The stage's type-specific parameters.
  pub params: Map<String, Value>,
  /// Pipeline-wide options after default merging.
  pub options: Map<String, Value>,
  pub sources: Vec<String>,
  pub sinks: Vec<String>,
  /// Byte range of the first source that a sharded invocation owns. Always
  /// starts at a record boundary and ends just after a newline or at the end
  /// of the object.
  pub range: Option<Range<u64>>,
  pub store: Arc<dyn Store>,
  pub cancel: CancellationToken,
}

impl StageContext {
  /// Deserialize the parameters into a stage-specific struct.
  pub fn params<T: DeserializeOwned>(&self) -> Result<T, StageError> {
    serde_json::from_value(Value::Object(self.params.clone()))
      .map_err(|e| StageError::permanent(format!("invalid parameters: {e}")))
  }

  pub fn source(&self, index: usize) -> Result<&str, StageError> {
    self
      .sources
      .get(index)
      .map(String::as_str)
      .ok_or_else(|| StageError::permanent(format!("missing source #{index}")))
  }

  pub fn sink(&self, index: usize) -> Result<&str, StageError> {
    self
      .sinks
      .get(index)
      .map(String::as_str)
      .ok_or_else(|| StageError::permanent(format!("missing sink #{index}")))
  }

  /// Read source `index` into memory, limited to [`StageContext::range`]
  /// for the first source of a sharded invocation.
  pub async fn read_source(&self, index: usize) -> Result<Bytes, StageError> {
    let location = self.source(index)?;
    let data = match (&self.range, index) {
      (Some(range), 0) => read_range(self.store.as_ref(), location, range.clone()).await?,
      _ => read_all(self.store.as_ref(), location).await?,
    };
    Ok(data)
  }

  /// Fail fast when the run has been cancelled.
  pub fn check_cancelled(&self) -> Result<(), StageError> {
    if self.cancel.is_cancelled() {
      Err(StageError::Cancelled)
    } else {
      Ok(())
    }
  }
}

impl std::fmt::Debug for StageContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageContext")
      .field("run_id", &self.run_id)
      .field("stage_id", &self.stage_id)
      .field("shard", &self.shard)
      .field("sources", &self.sources)
      .field("sinks", &self.sinks)
      .field("range", &self.range)
      .finish_non_exhaustive()
  }
}
