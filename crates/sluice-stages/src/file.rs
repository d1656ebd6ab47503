use std::io::ErrorKind;
use std::path::Path;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use sluice_stage::{Arity, FieldKind, Stage, StageContext, StageError, StageLinter, StageMetadata};
use sluice_storage::{DEFAULT_CONTENT_TYPE, read_all, write_all};
use tracing::info;

fn io_error(path: &Path, err: std::io::Error) -> StageError {
  let message = format!("{}: {err}", path.display());
  match err.kind() {
    ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
      StageError::permanent(message)
    }
    _ => StageError::transient(message),
  }
}

#[derive(Debug, Deserialize)]
struct FileInputParams {
  path: Option<String>,
  paths: Option<Vec<String>>,
}

impl FileInputParams {
  fn files(self) -> Vec<String> {
    let mut files: Vec<String> = self.path.into_iter().collect();
    files.extend(self.paths.unwrap_or_default());
    files
  }
}

/// Reads local files into the run's storage.
pub struct FileInput;

#[async_trait]
impl Stage for FileInput {
  fn describe(&self) -> &'static str {
    "# FileInput\n\n\
     Reads local files into storage.\n\n\
     - `path`: a single file to read.\n\
     - `paths`: a list of files to read.\n\n\
     With one sink, every file is concatenated into it in order. With as many \
     sinks as files, each file is written to its own sink."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::default().with_sinks(Arity::Any).idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    linter.at_least_one(&["path", "paths"]);
    linter.field("path", FieldKind::String, false);
    if linter.field("paths", FieldKind::Array, false).is_some() {
      linter.list_len("paths", 1, None);
      linter.validate("paths", |value| {
        let all_strings = value
          .as_array()
          .is_some_and(|entries| entries.iter().all(|e| e.is_string()));
        if all_strings {
          Ok(())
        } else {
          Err("Every entry must be a file path".to_string())
        }
      });
    }
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let files = ctx.params::<FileInputParams>()?.files();

    let mut contents = Vec::with_capacity(files.len());
    for file in &files {
      ctx.check_cancelled()?;
      let path = Path::new(file);
      let data = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
      contents.push(Bytes::from(data));
    }

    match ctx.sinks.len() {
      0 => {}
      n if n == contents.len() => {
        for (sink, data) in ctx.sinks.iter().zip(contents) {
          write_all(ctx.store.as_ref(), sink, data, DEFAULT_CONTENT_TYPE).await?;
        }
      }
      1 => {
        let mut buffer = BytesMut::new();
        for data in contents {
          buffer.extend_from_slice(&data);
        }
        write_all(ctx.store.as_ref(), ctx.sink(0)?, buffer.freeze(), DEFAULT_CONTENT_TYPE).await?;
      }
      n => {
        return Err(StageError::permanent(format!(
          "{} files cannot be written to {n} sinks",
          files.len()
        )));
      }
    }

    info!(stage_id = %ctx.stage_id, files = files.len(), "files_read");
    Ok(())
  }
}

#[derive(Debug, Deserialize)]
struct FileOutputParams {
  path: String,
}

/// Writes the concatenation of its sources to a local file.
pub struct FileOutput;

#[async_trait]
impl Stage for FileOutput {
  fn describe(&self) -> &'static str {
    "# FileOutput\n\n\
     Concatenates every source, in order, into a local file.\n\n\
     - `path` (required): the file to write. Parent directories are created."
  }

  fn metadata(&self) -> StageMetadata {
    StageMetadata::terminal().idempotent()
  }

  fn lint(&self, linter: &mut StageLinter<'_>) {
    linter.field("path", FieldKind::String, true);
  }

  async fn run(&self, ctx: StageContext) -> Result<(), StageError> {
    let params: FileOutputParams = ctx.params()?;
    let path = Path::new(&params.path);

    let mut buffer = BytesMut::new();
    for source in &ctx.sources {
      ctx.check_cancelled()?;
      buffer.extend_from_slice(&read_all(ctx.store.as_ref(), source).await?);
    }

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| io_error(parent, e))?;
    }
    tokio::fs::write(path, &buffer)
      .await
      .map_err(|e| io_error(path, e))?;

    info!(
      stage_id = %ctx.stage_id,
      path = %params.path,
      bytes = buffer.len(),
      "file_written"
    );
    Ok(())
  }
}
