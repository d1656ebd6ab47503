use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_config::merge_missing;
use sluice_lint::{LintSummary, Linter};
use sluice_resolver::WiringResolver;
use sluice_stage::StageMetadata;
use sluice_storage::LocationAllocator;
use sluice_template::{AppIdentity, RunVariableBindings, StorageSettings, expand_params};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::board::{RunBoard, RunStatus};
use crate::catalog::PipelineCatalog;
use crate::error::TriggerError;
use crate::queue::RunRequest;

/// Response to an accepted trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAccepted {
  pub run_id: String,
}

/// A pipeline variable as the editor tracks it. Fields other than `name`
/// are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
  pub name: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl VariableEntry {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      extra: Map::new(),
    }
  }
}

/// Help for one stage type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHelp {
  pub name: String,
  /// Markdown documentation.
  pub help: String,
  pub metadata: StageMetadata,
}

/// Validates, wires and queues pipeline runs on request.
pub struct TriggerService {
  catalog: Arc<PipelineCatalog>,
  linter: Arc<Linter>,
  resolver: WiringResolver,
  identity: AppIdentity,
  board: Arc<RunBoard>,
  runs: mpsc::Sender<RunRequest>,
}

impl TriggerService {
  pub fn new(
    catalog: Arc<PipelineCatalog>,
    linter: Arc<Linter>,
    identity: AppIdentity,
    board: Arc<RunBoard>,
    runs: mpsc::Sender<RunRequest>,
  ) -> Self {
    let resolver = WiringResolver::new(linter.registry().clone());
    Self {
      catalog,
      linter,
      resolver,
      identity,
      board,
      runs,
    }
  }

  /// Lint, wire and queue a run of the pipeline `name`.
  ///
  /// `params` are the request's query parameters. They bind template
  /// variables and override pipeline options (dotted keys address nested
  /// options, e.g. `storage.prefix`). The run executes in the background; its
  /// progress is available from [`TriggerService::run_status`].
  #[instrument(name = "trigger", skip(self, api_key, params), fields(pipeline = %name))]
  pub fn trigger(
    &self,
    name: &str,
    api_key: &str,
    params: &[(String, String)],
  ) -> Result<TriggerAccepted, TriggerError> {
    let definition = self
      .catalog
      .find(name, api_key)
      .ok_or_else(|| TriggerError::PipelineNotFound {
        name: name.to_string(),
      })?;
    let text = definition.config_text();

    let document_options = sluice_config::parse_document(&text)
      .ok()
      .and_then(|document| document.get("options").and_then(Value::as_object).cloned())
      .unwrap_or_default();
    let storage = StorageSettings::from_options(&self.layer_options(params, &document_options));
    let bindings = RunVariableBindings::for_today(&self.identity, &storage)
      .with_params(params.iter().map(|(k, v)| (k.as_str(), v.clone())));

    let missing = self.linter.missing_variables(&text, &bindings)?;
    if !missing.is_empty() {
      return Err(TriggerError::MissingVariables { names: missing });
    }

    let mut config = self.linter.lint(&text, Some(&bindings)).into_config()?;
    config.options = self.layer_options(params, &config.options);

    let run_id = uuid::Uuid::new_v4().to_string();
    let storage = StorageSettings::from_options(&config.options);
    let allocator = LocationAllocator::new(storage.run_prefix(&run_id));
    let graph = self.resolver.resolve(&config, &run_id, &allocator)?;

    self.board.queued(&run_id, name);
    let request = RunRequest {
      pipeline: name.to_string(),
      graph,
    };
    if let Err(e) = self.runs.try_send(request) {
      warn!(run_id = %run_id, error = %e, "run_rejected");
      self.board.abandon(&run_id, "run queue unavailable");
      return Err(TriggerError::QueueUnavailable);
    }

    info!(run_id = %run_id, pipeline = %name, "run_queued");
    Ok(TriggerAccepted { run_id })
  }

  /// Request parameters over `options`, with the default options beneath.
  fn layer_options(
    &self,
    params: &[(String, String)],
    options: &Map<String, Value>,
  ) -> Map<String, Value> {
    let mut layered = expand_params(params.iter().map(|(k, v)| (k.as_str(), v.clone())));
    merge_missing(&mut layered, options);
    merge_missing(&mut layered, self.linter.default_options());
    layered
  }

  pub fn run_status(&self, run_id: &str) -> Result<RunStatus, TriggerError> {
    self.board.get(run_id).ok_or_else(|| TriggerError::RunNotFound {
      run_id: run_id.to_string(),
    })
  }

  /// Lint a document without binding variables.
  pub fn lint(&self, text: &str) -> LintSummary {
    self.linter.lint(text, None).summary()
  }

  /// Reconcile an editor's variable list with the variables `text`
  /// references: entries no longer referenced are dropped, newly referenced
  /// names are added. The result is sorted by name.
  pub fn reconcile_variables(
    &self,
    text: &str,
    variables: Vec<VariableEntry>,
  ) -> Result<Vec<VariableEntry>, TriggerError> {
    let referenced: BTreeSet<String> =
      sluice_template::referenced_variables(&sluice_config::strip_comments(text))?;

    let mut entries: BTreeMap<String, VariableEntry> = variables
      .into_iter()
      .filter(|entry| referenced.contains(&entry.name))
      .map(|entry| (entry.name.clone(), entry))
      .collect();
    for name in referenced {
      entries
        .entry(name.clone())
        .or_insert_with(|| VariableEntry::named(name));
    }
    Ok(entries.into_values().collect())
  }

  /// Help for every registered stage type, sorted by name.
  pub fn stages(&self) -> Vec<StageHelp> {
    self
      .linter
      .registry()
      .names()
      .into_iter()
      .filter_map(|name| self.stage(name).ok())
      .collect()
  }

  /// Help for one stage type. Lookup is case-insensitive.
  pub fn stage(&self, stage_type: &str) -> Result<StageHelp, TriggerError> {
    let registry = self.linter.registry();
    let stage = registry.get(stage_type)?;
    let name = registry.canonical_name(stage_type).unwrap_or(stage_type);
    Ok(StageHelp {
      name: name.to_string(),
      help: stage.describe().to_string(),
      metadata: stage.metadata(),
    })
  }
}
