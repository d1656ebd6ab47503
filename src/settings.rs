use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};
use sluice_config::merge_missing;
use sluice_template::{AppIdentity, RunVariableBindings, StorageSettings, expand_params};

/// Process-wide settings shared by every command.
#[derive(Debug, Clone)]
pub struct Settings {
  pub data_dir: PathBuf,
  /// Merged into every pipeline's `options`; explicit values win.
  pub default_options: Map<String, Value>,
  pub identity: AppIdentity,
}

impl Settings {
  /// Resolve the data directory and read the default options file.
  ///
  /// `options_file` overrides `<data_dir>/options.json`, which is optional.
  pub fn load(
    data_dir: Option<PathBuf>,
    options_file: Option<PathBuf>,
    identity: AppIdentity,
  ) -> Result<Self> {
    let data_dir = match data_dir {
      Some(dir) => dir,
      None => dirs::home_dir()
        .context("could not determine home directory")?
        .join(".sluice"),
    };

    let default_options = match options_file {
      Some(path) => read_options(&path)?,
      None => {
        let path = data_dir.join("options.json");
        if path.exists() {
          read_options(&path)?
        } else {
          Map::new()
        }
      }
    };

    Ok(Self {
      data_dir,
      default_options,
      identity,
    })
  }

  pub fn storage_dir(&self) -> PathBuf {
    self.data_dir.join("storage")
  }

  pub fn pipelines_dir(&self) -> PathBuf {
    self.data_dir.join("pipelines")
  }

  /// Options in effect for a document: `vars`, then the document's own
  /// options, then the defaults.
  pub fn effective_options(&self, text: &str, vars: &[(String, String)]) -> Map<String, Value> {
    let document_options = sluice_config::parse_document(text)
      .ok()
      .and_then(|document| document.get("options").and_then(Value::as_object).cloned())
      .unwrap_or_default();

    let mut options = expand_params(vars.iter().map(|(k, v)| (k.as_str(), v.clone())));
    merge_missing(&mut options, &document_options);
    merge_missing(&mut options, &self.default_options);
    options
  }

  /// Bindings for a run of `text` today with the given `--var` values.
  pub fn bindings(&self, text: &str, vars: &[(String, String)]) -> RunVariableBindings {
    let storage = StorageSettings::from_options(&self.effective_options(text, vars));
    RunVariableBindings::for_today(&self.identity, &storage)
      .with_params(vars.iter().map(|(k, v)| (k.as_str(), v.clone())))
  }
}

fn read_options(path: &Path) -> Result<Map<String, Value>> {
  let text = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read options file: {}", path.display()))?;
  let document = sluice_config::parse_document(&text)
    .with_context(|| format!("failed to parse options file: {}", path.display()))?;
  match document {
    Value::Object(options) => Ok(options),
    other => bail!(
      "options file {} must contain a JSON object, found {}",
      path.display(),
      sluice_config::json_kind(&other)
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_load_reads_options_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("options.json"),
      r#"{
        // shared bucket
        "storage": {"bucket": "exports"}
      }"#,
    )
    .unwrap();

    let settings = Settings::load(Some(dir.path().to_path_buf()), None, AppIdentity::default()).unwrap();
    assert_eq!(settings.default_options["storage"]["bucket"], "exports");
    assert_eq!(settings.storage_dir(), dir.path().join("storage"));
  }

  #[test]
  fn test_options_file_must_be_an_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "[1, 2]").unwrap();

    let err = Settings::load(Some(dir.path().to_path_buf()), Some(path), AppIdentity::default())
      .unwrap_err();
    assert!(err.to_string().contains("must contain a JSON object"));
  }

  #[test]
  fn test_vars_override_document_and_default_options() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::load(Some(dir.path().to_path_buf()), None, AppIdentity::default()).unwrap();
    settings.default_options.insert(
      "storage".to_string(),
      serde_json::json!({"bucket": "default", "prefix": "p"}),
    );

    let text = r#"{"options": {"storage": {"bucket": "doc"}}}"#;
    let vars = vec![("storage.prefix".to_string(), "nightly".to_string())];
    let bindings = settings.bindings(text, &vars);

    assert_eq!(
      bindings.lookup("storage.url"),
      Some(&Value::String("store://doc/nightly".to_string()))
    );
  }
}
