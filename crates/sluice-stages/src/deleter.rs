use async_trait::async_trait;
use serde::Deserialize;
use sluice_stage::{FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use sluice_storage::delete_if_exists;
use tracing::info;

fn default_ignore_missing() -> bool {
  true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleterParams {
  #[serde(default = "default_ignore_missing")]
  ignore_missing: bool,
}

/// Deletes every source object.
pub struct Deleter;

#[async_trait]
impl Stage for Deleter {
  fn describe(&self) -> &'static str {
    "# Deleter\n\n\
     Deletes every source object. Useful as an output that cleans up \
     intermediate data.\n\n\
     - `ignoreMissing`: treat already-missing objects as deleted. Defaults to \
     `true`."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal().idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    linter.field("ignoreMissing", FieldKind::Boolean, false);
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let params: DeleterParams = ctx.params()?;
    for source in &ctx.sources {
      if params.ignore_missing {
        delete_if_exists(ctx.store.as_ref(), source).await?;
      } else {
        ctx.store.delete(source).await?;
      }
    }
    info!(stage_id = %ctx.stage_id, deleted = ctx.sources.len(), "sources_deleted");
    Ok(())
  }
}
