use async_trait::async_trait;
use serde_json::Value;
use sluice_stage::{FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use tracing::info;

/// Logs its resolved parameters and wiring, then succeeds.
pub struct LogConfig;

#[async_trait]
impl Stage for LogConfig {
  fn describe(&self) -> &'static str {
    "# LogConfig\n\n\
     Logs the stage's parameters, sources and sinks after variable \
     substitution and wiring. Reads and writes nothing.\n\n\
     - `message`: optional text included in the log line."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal().idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    linter.field("message", FieldKind::String, false);
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let message = ctx
      .params
      .get("message")
      .and_then(Value::as_str)
      .unwrap_or_default();

    info!(
      run_id = %ctx.run_id,
      stage_id = %ctx.stage_id,
      message = %message,
      params = %serde_json::Value::Object(ctx.params.clone()),
      sources = ?ctx.sources,
      sinks = ?ctx.sinks,
      "stage_config"
    );
    Ok(())
  }
}
