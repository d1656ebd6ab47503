use thiserror::Error;

/// Errors that can occur while reading a pipeline configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
  /// The document is not well-formed JSON after comment stripping.
  #[error("syntax error at line {line}, column {column}: {message}")]
  Syntax {
    line: usize,
    column: usize,
    message: String,
  },

  /// The document root is not a JSON object.
  #[error("configuration must be a JSON object, found {found}")]
  NotAnObject { found: &'static str },

  /// The document is well-formed but does not match the pipeline model.
  #[error("invalid configuration: {message}")]
  Invalid { message: String },
}

impl ConfigError {
  pub(crate) fn from_json(err: serde_json::Error) -> Self {
    Self::Syntax {
      line: err.line(),
      column: err.column(),
      message: err.to_string(),
    }
  }
}
