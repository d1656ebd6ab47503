use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::TriggerError;

/// A named pipeline that can be triggered over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
  pub name: String,
  /// Opaque token a trigger request must present.
  pub api_key: String,
  /// The pipeline document, either as raw text (comments and `{{ }}`
  /// tokens allowed) or as a JSON object.
  pub config: Value,
}

impl PipelineDefinition {
  /// The configuration as document text, ready for linting.
  pub fn config_text(&self) -> String {
    config_text(&self.config)
  }
}

/// Document text for a configuration given either as a string or as JSON.
pub fn config_text(config: &Value) -> String {
  match config {
    Value::String(text) => text.clone(),
    other => other.to_string(),
  }
}

/// The pipelines the trigger endpoint knows about, keyed by name.
///
/// Loaded once at startup from `*.json` files:
///
/// ```text
/// {data_dir}/pipelines/
/// ├── nightly-export.json
/// └── hourly-sync.json
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
  pipelines: BTreeMap<String, PipelineDefinition>,
}

impl PipelineCatalog {
  pub fn new(definitions: impl IntoIterator<Item = PipelineDefinition>) -> Self {
    Self {
      pipelines: definitions
        .into_iter()
        .map(|definition| (definition.name.clone(), definition))
        .collect(),
    }
  }

  /// Load every definition in `dir`. A missing directory is an empty catalog.
  pub async fn load(dir: &Path) -> Result<Self, TriggerError> {
    let catalog_error = |message: String| TriggerError::Catalog {
      path: dir.to_path_buf(),
      message,
    };

    let mut entries = match fs::read_dir(dir).await {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        warn!(path = %dir.display(), "pipeline directory not found");
        return Ok(Self::default());
      }
      Err(e) => return Err(catalog_error(e.to_string())),
    };

    let mut definitions = Vec::new();
    while let Some(entry) = entries
      .next_entry()
      .await
      .map_err(|e| catalog_error(e.to_string()))?
    {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      definitions.push(Self::read_definition(&path).await?);
    }

    let catalog = Self::new(definitions);
    debug!(path = %dir.display(), pipelines = catalog.len(), "pipeline_catalog_loaded");
    Ok(catalog)
  }

  async fn read_definition(path: &Path) -> Result<PipelineDefinition, TriggerError> {
    let catalog_error = |message: String| TriggerError::Catalog {
      path: path.to_path_buf(),
      message,
    };
    let text = fs::read_to_string(path)
      .await
      .map_err(|e| catalog_error(e.to_string()))?;
    let document = sluice_config::parse_document(&text).map_err(|e| catalog_error(e.to_string()))?;
    serde_json::from_value(document).map_err(|e| catalog_error(e.to_string()))
  }

  /// The pipeline called `name`, if `api_key` matches its key.
  pub fn find(&self, name: &str, api_key: &str) -> Option<&PipelineDefinition> {
    self
      .pipelines
      .get(name)
      .filter(|definition| definition.api_key == api_key)
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.pipelines.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.pipelines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pipelines.is_empty()
  }
}
