use std::collections::BTreeSet;
use std::fmt::Write as _;

use minijinja::{Environment, ErrorKind, UndefinedBehavior};

use crate::bindings::RunVariableBindings;
use crate::error::TemplateError;

fn environment() -> Environment<'static> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);
  env.set_keep_trailing_newline(true);
  env.set_formatter(|out, _state, value| {
    let text = match value.as_str() {
      Some(s) => s.to_string(),
      None => serde_json::to_string(value)
        .map_err(|e| minijinja::Error::new(ErrorKind::BadSerialization, e.to_string()))?,
    };

    // Escape as JSON string content: quotes, backslashes and control
    // characters in a value never terminate the surrounding literal.
    let quoted = serde_json::to_string(&text)
      .map_err(|e| minijinja::Error::new(ErrorKind::BadSerialization, e.to_string()))?;
    out
      .write_str(&quoted[1..quoted.len() - 1])
      .map_err(|_| minijinja::Error::new(ErrorKind::WriteFailure, "failed to write output"))
  });
  env
}

/// Replace every `{{ token }}` in `text` with its bound value.
///
/// All tokens are checked before anything is rendered, so a failure lists
/// every unresolved name rather than only the first.
pub fn substitute(text: &str, bindings: &RunVariableBindings) -> Result<String, TemplateError> {
  let missing = missing_variables(text, bindings)?;
  if !missing.is_empty() {
    return Err(TemplateError::UnresolvedVariable { names: missing });
  }

  environment()
    .render_str(text, bindings.values())
    .map_err(|e| TemplateError::Render {
      message: e.to_string(),
    })
}

/// Every dotted variable path `text` references, e.g. `storage.url`.
pub fn referenced_variables(text: &str) -> Result<BTreeSet<String>, TemplateError> {
  let env = Environment::new();
  let template = env
    .template_from_str(text)
    .map_err(|e| TemplateError::Syntax {
      message: e.to_string(),
    })?;

  Ok(template.undeclared_variables(true).into_iter().collect())
}

/// The referenced variables that `bindings` cannot satisfy, sorted.
pub fn missing_variables(
  text: &str,
  bindings: &RunVariableBindings,
) -> Result<Vec<String>, TemplateError> {
  Ok(
    referenced_variables(text)?
      .into_iter()
      .filter(|name| bindings.lookup(name).is_none())
      .collect(),
  )
}
