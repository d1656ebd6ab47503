use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use serde::Deserialize;
use sluice_stage::{Arity, FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use sluice_storage::write_all;

#[derive(Debug, Deserialize)]
struct MatchReplaceParams {
  pattern: String,
  #[serde(default)]
  replacement: String,
}

/// Apply `re` to each line of `text`, keeping line endings intact.
pub fn replace_lines(re: &Regex, replacement: &str, text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for line in text.split_inclusive('\n') {
    let (body, ending) = match line.strip_suffix('\n') {
      Some(body) => (body, "\n"),
      None => (line, ""),
    };
    out.push_str(&re.replace_all(body, replacement));
    out.push_str(ending);
  }
  out
}

/// Line-wise regular expression replacement.
pub struct MatchReplace;

#[async_trait]
impl Stage for MatchReplace {
  fn describe(&self) -> &'static str {
    "# MatchReplace\n\n\
     Replaces every match of a regular expression, line by line.\n\n\
     - `pattern` (required): the regular expression.\n\
     - `replacement`: replacement text, `$1`/`${name}` refer to capture groups. \
     Defaults to the empty string.\n\
     - `shardSize`: split inputs larger than this many bytes into shards \
     processed in parallel.\n\n\
     Reads exactly one source and writes exactly one sink."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default()
      .with_sources(Arity::Exactly(1))
      .idempotent()
      .shardable()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    if linter.field("pattern", FieldKind::String, true).is_some() {
      linter.validate("pattern", |value| {
        Regex::new(value.as_str().unwrap_or_default())
          .map(|_| ())
          .map_err(|e| format!("Invalid pattern: {e}"))
      });
    }
    linter.field("replacement", FieldKind::String, false);
    if linter.field("shardSize", FieldKind::Integer, false).is_some() {
      linter.integer_range("shardSize", 1, None);
    }
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let params: MatchReplaceParams = ctx.params()?;
    let re = Regex::new(&params.pattern)
      .map_err(|e| StageError::permanent(format!("invalid pattern: {e}")))?;

    let data = ctx.read_source(0).await?;
    let text = std::str::from_utf8(&data)
      .map_err(|e| StageError::permanent(format!("source is not UTF-8 text: {e}")))?;

    let replaced = replace_lines(&re, &params.replacement, text);
    write_all(
      ctx.store.as_ref(),
      ctx.sink(0)?,
      Bytes::from(replaced),
      "text/plain",
    )
    .await?;
    Ok(())
  }
}
