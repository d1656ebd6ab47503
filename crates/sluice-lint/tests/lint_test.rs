use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use sluice_config::{Phase, Wiring};
use sluice_lint::{LintResult, Linter};
use sluice_stage::LintCode;
use sluice_template::{AppIdentity, RunVariableBindings, StorageSettings};

fn linter() -> Linter {
  Linter::new(sluice_stages::registry(), Map::new())
}

fn lint(config: Value) -> LintResult {
  linter().lint(&config.to_string(), None)
}

fn bindings() -> RunVariableBindings {
  let storage = StorageSettings {
    bucket: "exports".to_string(),
    prefix: "daily".to_string(),
  };
  RunVariableBindings::new(
    &AppIdentity::default(),
    &storage,
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
  )
}

#[test]
fn test_minimal_pipeline_is_runnable() {
  let result = lint(json!({
    "inputs": [{"type": "FileInput", "path": "/data/in.csv"}],
    "outputs": [{"type": "FileOutput", "path": "/data/out.csv"}]
  }));

  assert!(result.is_runnable(), "{:?}", result.summary());
  let config = result.into_config().unwrap();
  assert_eq!(config.inputs.len(), 1);
  assert_eq!(config.inputs[0].sinks, Wiring::Omitted);
}

#[test]
fn test_empty_pipeline() {
  let result = lint(json!({"inputs": [], "transforms": [], "outputs": []}));

  assert!(!result.is_runnable());
  assert_eq!(result.failure_codes(), vec![LintCode::EmptyPipeline]);
  let summary = result.summary();
  assert_eq!(summary.general_errors[0].check, "HasOneInputOrOutputStage");
}

#[test]
fn test_syntax_error_short_circuits() {
  let result = linter().lint(r#"{"inputs": [{"type": "FileInput",}]}"#, None);

  assert!(!result.is_runnable());
  assert_eq!(result.failure_codes(), vec![LintCode::SyntaxError]);
  assert!(result.inputs.is_empty());
  assert!(result.general.contains_key("SyntaxValid"));
}

#[test]
fn test_comments_are_tolerated() {
  let result = linter().lint(
    r#"{
      // nightly import
      "inputs": [{"type": "FileInput", "path": "/data/in.csv" /* local */}]
    }"#,
    None,
  );
  assert!(result.is_runnable(), "{:?}", result.summary());
}

#[test]
fn test_null_entry_is_ambiguous_but_null_list_is_clean() {
  let result = lint(json!({
    "inputs": [{"type": "FileInput", "path": "/a", "sinks": null}],
    "outputs": [{"type": "FileOutput", "path": "/b", "sources": [null]}]
  }));

  assert_eq!(result.failure_codes(), vec![LintCode::AmbiguousNullEntry]);
  let outputs = result.stage_errors(Phase::Outputs);
  assert_eq!(outputs[0].index, 0);
  assert_eq!(outputs[0].stage_type.as_deref(), Some("FileOutput"));
  assert_eq!(outputs[0].errors[0].check, "NoNullEntries [sources]");
  assert!(result.stage_errors(Phase::Inputs).is_empty());
}

#[test]
fn test_stage_type_problems() {
  let result = lint(json!({
    "inputs": [
      {"path": "/a"},
      {"type": "NoSuchStage"},
      {"type": "fileinput", "path": "/b"}
    ]
  }));

  let codes: Vec<_> = result.inputs.iter().map(|r| r.checks["TypeValid [type]"].code).collect();
  assert_eq!(
    codes,
    vec![
      Some(LintCode::MissingStageType),
      Some(LintCode::UnknownStageType),
      None
    ]
  );
  assert_eq!(result.inputs[1].stage_type.as_deref(), Some("NoSuchStage"));
  assert_eq!(result.inputs[2].stage_type.as_deref(), Some("FileInput"));
}

#[test]
fn test_stage_parameters_are_checked() {
  let result = lint(json!({
    "inputs": [{"type": "FileInput"}],
    "transforms": [{"type": "MatchReplace", "pattern": "(", "comment": "inert"}],
    "outputs": [{"type": "FileOutput", "path": 7}]
  }));

  let summary = result.summary();
  assert!(!summary.runnable);
  assert_eq!(summary.inputs[0].errors[0].check, "AtLeastOneFieldRequired [path, paths]");
  assert_eq!(summary.transforms[0].errors[0].check, "FieldValid [pattern]");
  assert_eq!(summary.outputs[0].errors[0].check, "TypeValid [path]");
  assert_eq!(summary.error_count(), 3);
}

#[test]
fn test_sink_arity() {
  let result = lint(json!({
    "inputs": [{"type": "FileInput", "path": "/a", "sinks": ["store://b/one", "store://b/two"]}],
    "transforms": [{"type": "Compositor", "sinks": ["store://b/x", "store://b/y"]}],
    "outputs": [{"type": "FileOutput", "path": "/c", "sinks": []}]
  }));

  assert!(result.stage_errors(Phase::Inputs).is_empty());
  assert!(result.stage_errors(Phase::Outputs).is_empty());
  let transforms = result.stage_errors(Phase::Transforms);
  assert_eq!(transforms[0].errors[0].code, Some(LintCode::SinkArityMismatch));
  assert_eq!(transforms[0].errors[0].reason, "Expected 1 sinks, found 2");
}

#[test]
fn test_sink_shared_by_two_stages() {
  let result = lint(json!({
    "inputs": [{"type": "FileInput", "path": "/a", "sinks": ["store://d/raw"]}],
    "transforms": [
      {"type": "MatchReplace", "pattern": "a", "sinks": ["store://d/raw2"]},
      {"type": "MatchReplace", "pattern": "b", "sinks": ["store://d/raw2"]}
    ]
  }));

  assert!(!result.is_runnable());
  assert_eq!(result.failure_codes(), vec![LintCode::SharedSink]);
  let summary = result.summary();
  assert_eq!(summary.general_errors[0].check, "UniqueSinks");
  assert_eq!(
    summary.general_errors[0].reason,
    "'store://d/raw2' is a sink of more than one stage: transforms[0], transforms[1]"
  );
}

#[test]
fn test_unknown_root_keys_and_bad_phase_types() {
  let result = lint(json!({
    "inputs": {"type": "FileInput"},
    "outputs": [{"type": "LogConfig"}],
    "extra": true
  }));

  let checks: Vec<_> = result.general_errors().into_iter().map(|i| i.check).collect();
  assert_eq!(checks, vec!["NoUnknownKeys", "TypeValid [inputs]"]);
}

#[test]
fn test_default_options_are_merged() {
  let defaults = json!({"shardSize": 1024, "region": "eu"});
  let linter = Linter::new(
    sluice_stages::registry(),
    defaults.as_object().cloned().unwrap(),
  );
  let result = linter.lint(
    &json!({
      "inputs": [{"type": "FileInput", "path": "/a"}],
      "options": {"region": "us"}
    })
    .to_string(),
    None,
  );

  let config = result.into_config().unwrap();
  assert_eq!(config.options["region"], "us");
  assert_eq!(config.options["shardSize"], 1024);
}

#[test]
fn test_variables_are_substituted() {
  let text = r#"{
    "inputs": [{"type": "FileInput", "path": "/data/{{ table }}-{{ date.ymd }}.csv"}],
    "outputs": [{"type": "FileOutput", "path": "/out/{{ region }}/{{ table }}.csv"}],
    "options": {"region": "eu"},
    "variables": {"table": {"default": "orders"}}
  }"#;

  let result = linter().lint(text, Some(&bindings().with_params([("table", "users")])));
  let config = result.into_config().unwrap();
  assert_eq!(config.inputs[0].params["path"], "/data/users-20240301.csv");
  assert_eq!(config.outputs[0].params["path"], "/out/eu/users.csv");

  let result = linter().lint(text, Some(&bindings()));
  let config = result.into_config().unwrap();
  assert_eq!(config.inputs[0].params["path"], "/data/orders-20240301.csv");
}

#[test]
fn test_unresolved_variables_are_reported_together() {
  let text = r#"{
    "inputs": [{"type": "FileInput", "path": "/{{ first }}/{{ second }}"}]
  }"#;

  let result = linter().lint(text, Some(&bindings()));
  assert_eq!(result.failure_codes(), vec![LintCode::UnresolvedVariable]);
  assert_eq!(
    result.general["TemplateValid"].reason.as_deref(),
    Some("Unresolved variables: first, second")
  );
  assert_eq!(
    linter().missing_variables(text, &bindings()).unwrap(),
    vec!["first", "second"]
  );
}

#[test]
fn test_substituted_values_cannot_break_json() {
  let text = r#"{"inputs": [{"type": "FileInput", "path": "{{ name }}"}]}"#;
  let bindings = bindings().with_params([("name", "a\"b\\c")]);

  let config = linter().lint(text, Some(&bindings)).into_config().unwrap();
  assert_eq!(config.inputs[0].params["path"], "a\"b\\c");
}

#[test]
fn test_lint_is_idempotent() {
  let config = json!({
    "inputs": [{"type": "FileInput"}],
    "outputs": [{"type": "Nope"}]
  });
  let first = lint(config.clone()).summary();
  let second = lint(config).summary();
  assert_eq!(first, second);
}
