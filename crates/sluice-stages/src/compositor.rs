use async_trait::async_trait;
use serde::Deserialize;
use sluice_stage::{FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use sluice_storage::{
  DEFAULT_CONTENT_TYPE, LocationAllocator, compose_ordered, delete_if_exists,
};
use tracing::info;

/// Check that `value` looks like a `type/subtype` media type.
pub fn validate_content_type(value: &str) -> Result<(), String> {
  let valid = value.split_once('/').is_some_and(|(kind, subtype)| {
    !kind.is_empty()
      && !subtype.is_empty()
      && !subtype.contains('/')
      && !value.chars().any(char::is_whitespace)
  });
  if valid {
    Ok(())
  } else {
    Err(format!("Invalid content type '{value}', expected type/subtype"))
  }
}

fn default_content_type() -> String {
  DEFAULT_CONTENT_TYPE.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositorParams {
  #[serde(default = "default_content_type")]
  content_type: String,
  #[serde(default)]
  delete_sources: bool,
}

/// Concatenates all of its sources, in order, into its sink.
pub struct Compositor;

#[async_trait]
impl Stage for Compositor {
  fn describe(&self) -> &'static str {
    "# Compositor\n\n\
     Concatenates every source, in order, into a single sink object. Any \
     number of sources is accepted; large fan-ins are composed in batches.\n\n\
     - `contentType`: content type of the result, `type/subtype`. Defaults to \
     `application/octet-stream`.\n\
     - `deleteSources`: delete the sources once composed. Defaults to `false`."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default().idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    if linter.field("contentType", FieldKind::String, false).is_some() {
      linter.validate("contentType", |value| {
        validate_content_type(value.as_str().unwrap_or_default())
      });
    }
    linter.field("deleteSources", FieldKind::Boolean, false);
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let params: CompositorParams = ctx.params()?;
    let sink = ctx.sink(0)?;
    let scratch = LocationAllocator::new(format!("{sink}.parts"));

    let summary = compose_ordered(
      ctx.store.as_ref(),
      &ctx.sources,
      sink,
      &params.content_type,
      &scratch,
      ctx.store.max_compose_sources(),
    )
    .await?;

    if params.delete_sources {
      for source in &ctx.sources {
        delete_if_exists(ctx.store.as_ref(), source).await?;
      }
    }

    info!(
      stage_id = %ctx.stage_id,
      sources = ctx.sources.len(),
      calls = summary.calls,
      "sources_composed"
    );
    Ok(())
  }
}
