use thiserror::Error;

/// Errors that can occur during variable substitution.
#[derive(Debug, Error)]
pub enum TemplateError {
  /// One or more tokens resolved in none of the binding layers.
  #[error("unresolved variables: {}", names.join(", "))]
  UnresolvedVariable { names: Vec<String> },

  /// The document is not a valid template.
  #[error("template syntax error: {message}")]
  Syntax { message: String },

  /// Rendering failed after all variables were found.
  #[error("template render failed: {message}")]
  Render { message: String },
}
