use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sluice_config::{
  ConfigError, Phase, PipelineConfig, ROOT_KEYS, VariableDecl, json_kind, merge_missing,
  parse_document, strip_comments,
};
use sluice_stage::{Arity, CheckResult, LintCode, Stage, StageLinter, StageRegistry};
use sluice_template::{RunVariableBindings, TemplateError};
use tracing::debug;

use crate::result::{LintResult, StageReport};

const SYNTAX_VALID: &str = "SyntaxValid";
const TEMPLATE_VALID: &str = "TemplateValid";
const NO_UNKNOWN_KEYS: &str = "NoUnknownKeys";
const HAS_INPUT_OR_OUTPUT: &str = "HasOneInputOrOutputStage";
const CONFIG_VALID: &str = "ConfigValid";
const STAGE_TYPE_VALID: &str = "TypeValid [type]";
const SINK_ARITY: &str = "SinkArity";
const UNIQUE_SINKS: &str = "UniqueSinks";

/// Keys of a stage object that are not stage parameters.
const STAGE_KEYS: [&str; 3] = ["type", "sources", "sinks"];

/// Validates pipeline documents against a stage registry.
///
/// Linting is pure: it reads the document, the registry and the default
/// options and nothing else, so the same input always yields the same result.
pub struct Linter {
  registry: Arc<StageRegistry>,
  default_options: Map<String, Value>,
}

impl Linter {
  /// `default_options` fill in any option a document does not set.
  pub fn new(registry: Arc<StageRegistry>, default_options: Map<String, Value>) -> Self {
    Self {
      registry,
      default_options,
    }
  }

  pub fn registry(&self) -> &Arc<StageRegistry> {
    &self.registry
  }

  pub fn default_options(&self) -> &Map<String, Value> {
    &self.default_options
  }

  /// Lint `text`. With `bindings`, variables are substituted first and the
  /// substituted document is what gets checked and returned.
  pub fn lint(&self, text: &str, bindings: Option<&RunVariableBindings>) -> LintResult {
    let mut result = LintResult::new();

    let mut document = match parse_object(text) {
      Ok(document) => {
        result.record(SYNTAX_VALID, CheckResult::ok());
        document
      }
      Err(err) => {
        result.fail(SYNTAX_VALID, LintCode::SyntaxError, err.to_string());
        return result;
      }
    };

    self.merge_default_options(&mut document, &mut result);

    if let Some(bindings) = bindings {
      match self.substitute(&document, bindings) {
        Ok(substituted) => {
          result.record(TEMPLATE_VALID, CheckResult::ok());
          document = substituted;
        }
        Err(err) => result.record(TEMPLATE_VALID, template_failure(&err)),
      }
    }

    check_root_keys(&document, &mut result);

    for phase in Phase::ALL {
      let entries: &[Value] = match document.get(phase.key()) {
        None => &[],
        Some(Value::Array(entries)) => entries,
        Some(other) => {
          result.fail(
            &format!("TypeValid [{}]", phase.key()),
            LintCode::InvalidField,
            format!("Expected array, found {}", json_kind(other)),
          );
          &[]
        }
      };
      *result.phase_mut(phase) = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| self.lint_stage(index, entry))
        .collect();
    }

    check_unique_sinks(&document, &mut result);

    if result.inputs.is_empty() && result.outputs.is_empty() {
      result.fail(
        HAS_INPUT_OR_OUTPUT,
        LintCode::EmptyPipeline,
        "A pipeline needs at least one input or output stage",
      );
    } else {
      result.record(HAS_INPUT_OR_OUTPUT, CheckResult::ok());
    }

    if result.is_runnable() {
      match PipelineConfig::from_value(Value::Object(document)) {
        Ok(config) => result.config = Some(config),
        Err(err) => result.fail(CONFIG_VALID, LintCode::InvalidField, err.to_string()),
      }
    }

    debug!(
      runnable = result.is_runnable(),
      failed_checks = result.summary().error_count(),
      "config_linted"
    );
    result
  }

  /// Variables `text` references that neither `bindings`, the document's
  /// options, the default options nor declared defaults provide.
  pub fn missing_variables(
    &self,
    text: &str,
    bindings: &RunVariableBindings,
  ) -> Result<Vec<String>, TemplateError> {
    let document = parse_object(text).unwrap_or_default();
    let effective = self.effective_bindings(&document, bindings);
    sluice_template::missing_variables(&strip_comments(text), &effective)
  }

  fn merge_default_options(&self, document: &mut Map<String, Value>, result: &mut LintResult) {
    let options = document
      .entry("options")
      .or_insert_with(|| Value::Object(Map::new()));
    match options {
      Value::Object(options) => {
        merge_missing(options, &self.default_options);
        result.record("TypeValid [options]", CheckResult::ok());
      }
      other => result.fail(
        "TypeValid [options]",
        LintCode::InvalidField,
        format!("Expected object, found {}", json_kind(other)),
      ),
    }
  }

  fn effective_bindings(
    &self,
    document: &Map<String, Value>,
    bindings: &RunVariableBindings,
  ) -> RunVariableBindings {
    let options = document
      .get("options")
      .and_then(Value::as_object)
      .cloned()
      .unwrap_or_default();
    bindings
      .clone()
      .with_options(&options)
      .with_options(&self.default_options)
      .with_declared(&declared_variables(document))
  }

  fn substitute(
    &self,
    document: &Map<String, Value>,
    bindings: &RunVariableBindings,
  ) -> Result<Map<String, Value>, TemplateError> {
    let text = serde_json::to_string_pretty(document).map_err(|e| TemplateError::Render {
      message: e.to_string(),
    })?;
    let rendered = sluice_template::substitute(&text, &self.effective_bindings(document, bindings))?;

    match serde_json::from_str(&rendered) {
      Ok(Value::Object(substituted)) => Ok(substituted),
      Ok(other) => Err(TemplateError::Render {
        message: format!("substituted configuration is a {}", json_kind(&other)),
      }),
      Err(e) => Err(TemplateError::Render {
        message: format!("substituted configuration is not valid JSON: {e}"),
      }),
    }
  }

  fn lint_stage(&self, index: usize, entry: &Value) -> StageReport {
    let mut report = StageReport {
      index,
      stage_type: None,
      checks: BTreeMap::new(),
    };

    let Value::Object(stage) = entry else {
      report.checks.insert(
        "TypeValid [stage]".to_string(),
        CheckResult::fail(
          LintCode::InvalidField,
          format!("Expected object, found {}", json_kind(entry)),
        ),
      );
      return report;
    };

    let params: Map<String, Value> = stage
      .iter()
      .filter(|(key, _)| !STAGE_KEYS.contains(&key.as_str()))
      .map(|(key, value)| (key.clone(), value.clone()))
      .collect();
    let mut linter = StageLinter::new(&params);

    let implementation = self.resolve_type(stage.get("type"), &mut linter, &mut report);
    check_locations(&mut linter, stage.get("sources"), "sources");
    let explicit_sinks = check_locations(&mut linter, stage.get("sinks"), "sinks");

    if let Some(implementation) = implementation {
      implementation.lint(&mut linter);

      let metadata = implementation.metadata();
      if let Some(count) = explicit_sinks
        && let Arity::Exactly(expected) = metadata.sink_arity
      {
        if count == expected || (metadata.partial_sinks && count < expected) {
          linter.record(SINK_ARITY, CheckResult::ok());
        } else {
          linter.fail(
            SINK_ARITY,
            LintCode::SinkArityMismatch,
            format!("Expected {expected} sinks, found {count}"),
          );
        }
      }
    }

    report.checks = linter.into_checks();
    report
  }

  fn resolve_type(
    &self,
    value: Option<&Value>,
    linter: &mut StageLinter<'_>,
    report: &mut StageReport,
  ) -> Option<Arc<dyn Stage>> {
    match value {
      None | Some(Value::Null) => {
        linter.fail(STAGE_TYPE_VALID, LintCode::MissingStageType, "Missing stage type");
        None
      }
      Some(Value::String(name)) => match self.registry.canonical_name(name) {
        Some(canonical) => {
          report.stage_type = Some(canonical.to_string());
          linter.record(STAGE_TYPE_VALID, CheckResult::ok());
          self.registry.get(canonical).ok()
        }
        None => {
          report.stage_type = Some(name.clone());
          linter.fail(
            STAGE_TYPE_VALID,
            LintCode::UnknownStageType,
            format!("Unknown stage type '{name}'"),
          );
          None
        }
      },
      Some(other) => {
        linter.fail(
          STAGE_TYPE_VALID,
          LintCode::MissingStageType,
          format!("Expected string, found {}", json_kind(other)),
        );
        None
      }
    }
  }
}

fn parse_object(text: &str) -> Result<Map<String, Value>, ConfigError> {
  match parse_document(text)? {
    Value::Object(document) => Ok(document),
    other => Err(ConfigError::NotAnObject {
      found: json_kind(&other),
    }),
  }
}

fn declared_variables(document: &Map<String, Value>) -> BTreeMap<String, VariableDecl> {
  document
    .get("variables")
    .cloned()
    .and_then(|value| serde_json::from_value(value).ok())
    .unwrap_or_default()
}

fn template_failure(err: &TemplateError) -> CheckResult {
  match err {
    TemplateError::UnresolvedVariable { names } => CheckResult::fail(
      LintCode::UnresolvedVariable,
      format!("Unresolved variables: {}", names.join(", ")),
    ),
    other => CheckResult::fail(LintCode::TemplateError, other.to_string()),
  }
}

fn check_root_keys(document: &Map<String, Value>, result: &mut LintResult) {
  let unknown: Vec<&str> = document
    .keys()
    .map(String::as_str)
    .filter(|key| !ROOT_KEYS.contains(key))
    .collect();
  if unknown.is_empty() {
    result.record(NO_UNKNOWN_KEYS, CheckResult::ok());
  } else {
    result.fail(
      NO_UNKNOWN_KEYS,
      LintCode::UnknownConfigKeys,
      format!("Unknown keys: {}", unknown.join(", ")),
    );
  }

  if let Some(variables) = document.get("variables") {
    let valid = serde_json::from_value::<BTreeMap<String, VariableDecl>>(variables.clone());
    match valid {
      Ok(_) => result.record("TypeValid [variables]", CheckResult::ok()),
      Err(e) => result.fail("TypeValid [variables]", LintCode::InvalidField, e.to_string()),
    }
  }
}

/// No location may be named as a sink by more than one stage.
fn check_unique_sinks(document: &Map<String, Value>, result: &mut LintResult) {
  let mut writers: BTreeMap<&str, Vec<String>> = BTreeMap::new();
  for phase in Phase::ALL {
    let Some(Value::Array(entries)) = document.get(phase.key()) else {
      continue;
    };
    for (index, entry) in entries.iter().enumerate() {
      let Some(Value::Array(sinks)) = entry.get("sinks") else {
        continue;
      };
      let id = format!("{}[{index}]", phase.key());
      for sink in sinks.iter().filter_map(Value::as_str) {
        let stages = writers.entry(sink).or_default();
        if !stages.contains(&id) {
          stages.push(id.clone());
        }
      }
    }
  }

  match writers.iter().find(|(_, stages)| stages.len() > 1) {
    Some((location, stages)) => result.fail(
      UNIQUE_SINKS,
      LintCode::SharedSink,
      format!("'{location}' is a sink of more than one stage: {}", stages.join(", ")),
    ),
    None => result.record(UNIQUE_SINKS, CheckResult::ok()),
  }
}

/// Check a `sources`/`sinks` value. Returns the length of a valid explicit
/// list.
fn check_locations(linter: &mut StageLinter<'_>, value: Option<&Value>, key: &str) -> Option<usize> {
  let check = format!("TypeValid [{key}]");
  match value {
    None | Some(Value::Null) => None,
    Some(Value::Array(entries)) => {
      if entries.iter().any(Value::is_null) {
        linter.fail(
          format!("NoNullEntries [{key}]"),
          LintCode::AmbiguousNullEntry,
          "Invalid value: null. Use null instead of the list to disable wiring",
        );
        return None;
      }
      if let Some(bad) = entries.iter().find(|entry| !entry.is_string()) {
        linter.fail(
          check,
          LintCode::InvalidField,
          format!("Expected list of locations, found {} entry", json_kind(bad)),
        );
        return None;
      }
      linter.record(check, CheckResult::ok());
      Some(entries.len())
    }
    Some(other) => {
      linter.fail(
        check,
        LintCode::InvalidField,
        format!("Expected list or null, found {}", json_kind(other)),
      );
      None
    }
  }
}
