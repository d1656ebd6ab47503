use async_trait::async_trait;

use crate::context::StageContext;
use crate::error::StageError;
use crate::linter::StageLinter;
use crate::metadata::StageMetadata;

/// A pipeline stage type.
///
/// Implementations are stateless: parameters and wiring arrive with each
/// call, so one instance may serve any number of concurrent invocations.
#[async_trait]
pub trait Stage: Send + Sync {
  /// Markdown help text for the stage type.
  fn describe(&self) -> &'static str;

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default()
  }

  /// Validate the stage's parameters, recording checks on `linter`.
  fn lint(&self, _linter: &mut StageLinter<'_>) {}

  /// Execute the stage against its concrete sources and sinks.
  async fn run(&self, ctx: StageContext) -> Result<(), StageError>;
}
