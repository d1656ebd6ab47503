//! Building blocks for configuration checks.
//!
//! Every check has a name (`FieldExists [path]`, `TypeValid [path]`, ...) and
//! a [`CheckResult`]. A failing result carries a machine-readable
//! [`LintCode`] and a human-readable reason.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_config::json_kind;

/// Machine-readable classification of a failed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LintCode {
  SyntaxError,
  TemplateError,
  UnresolvedVariable,
  EmptyPipeline,
  UnknownConfigKeys,
  MissingStageType,
  UnknownStageType,
  MissingField,
  InvalidField,
  AmbiguousNullEntry,
  SinkArityMismatch,
  SharedSink,
}

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
  pub pass: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code: Option<LintCode>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

impl CheckResult {
  pub fn ok() -> Self {
    Self {
      pass: true,
      code: None,
      reason: None,
    }
  }

  pub fn fail(code: LintCode, reason: impl Into<String>) -> Self {
    Self {
      pass: false,
      code: Some(code),
      reason: Some(reason.into()),
    }
  }
}

/// JSON types a parameter can be required to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
  String,
  Integer,
  Number,
  Boolean,
  Array,
  Object,
}

impl FieldKind {
  pub fn matches(self, value: &Value) -> bool {
    match self {
      FieldKind::String => value.is_string(),
      FieldKind::Integer => value.is_i64() || value.is_u64(),
      FieldKind::Number => value.is_number(),
      FieldKind::Boolean => value.is_boolean(),
      FieldKind::Array => value.is_array(),
      FieldKind::Object => value.is_object(),
    }
  }
}

impl fmt::Display for FieldKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FieldKind::String => "string",
      FieldKind::Integer => "integer",
      FieldKind::Number => "number",
      FieldKind::Boolean => "boolean",
      FieldKind::Array => "array",
      FieldKind::Object => "object",
    };
    f.write_str(name)
  }
}

/// Look up a dotted path (`headers.accept`) in a parameter map.
pub fn lookup_path<'a>(params: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
  let mut segments = path.split('.');
  let mut current = params.get(segments.next()?)?;
  for segment in segments {
    current = current.as_object()?.get(segment)?;
  }
  Some(current)
}

/// Collects named checks over one stage's parameters.
///
/// Passed to [`crate::Stage::lint`]; the helpers record a check each time
/// they run and return the inspected value when it is usable, so stages can
/// chain further validation.
#[derive(Debug)]
pub struct StageLinter<'a> {
  params: &'a Map<String, Value>,
  checks: BTreeMap<String, CheckResult>,
}

impl<'a> StageLinter<'a> {
  pub fn new(params: &'a Map<String, Value>) -> Self {
    Self {
      params,
      checks: BTreeMap::new(),
    }
  }

  pub fn params(&self) -> &'a Map<String, Value> {
    self.params
  }

  /// Record a check. A failure already recorded under the same name is kept.
  pub fn record(&mut self, name: impl Into<String>, result: CheckResult) {
    let name = name.into();
    match self.checks.get(&name) {
      Some(existing) if !existing.pass => {}
      _ => {
        self.checks.insert(name, result);
      }
    }
  }

  pub fn fail(&mut self, name: impl Into<String>, code: LintCode, reason: impl Into<String>) {
    self.record(name, CheckResult::fail(code, reason));
  }

  /// Require `path` to be present.
  pub fn require(&mut self, path: &str) -> Option<&'a Value> {
    let value = lookup_path(self.params, path);
    let check = format!("FieldExists [{path}]");
    match value {
      Some(_) => self.record(check, CheckResult::ok()),
      None => self.fail(check, LintCode::MissingField, "Missing required field"),
    }
    value
  }

  /// Check the type of `path`, requiring it to be present if `required`.
  ///
  /// Returns the value only when it is present and of the right kind.
  pub fn field(&mut self, path: &str, kind: FieldKind, required: bool) -> Option<&'a Value> {
    let value = if required {
      self.require(path)?
    } else {
      lookup_path(self.params, path)?
    };

    let check = format!("TypeValid [{path}]");
    if kind.matches(value) {
      self.record(check, CheckResult::ok());
      Some(value)
    } else {
      self.fail(
        check,
        LintCode::InvalidField,
        format!("Expected {kind}, found {}", json_kind(value)),
      );
      None
    }
  }

  /// Require at least one of `paths` to be present.
  pub fn at_least_one(&mut self, paths: &[&str]) -> bool {
    let found = paths.iter().any(|p| lookup_path(self.params, p).is_some());
    let check = format!("AtLeastOneFieldRequired [{}]", paths.join(", "));
    if found {
      self.record(check, CheckResult::ok());
    } else {
      self.fail(
        check,
        LintCode::MissingField,
        format!("One of {} is required", paths.join(", ")),
      );
    }
    found
  }

  /// Run a custom validator over `path` if it is present.
  pub fn validate<F>(&mut self, path: &str, validator: F) -> bool
  where
    F: FnOnce(&Value) -> Result<(), String>,
  {
    let Some(value) = lookup_path(self.params, path) else {
      return true;
    };
    let check = format!("FieldValid [{path}]");
    match validator(value) {
      Ok(()) => {
        self.record(check, CheckResult::ok());
        true
      }
      Err(reason) => {
        self.fail(check, LintCode::InvalidField, reason);
        false
      }
    }
  }

  /// Bound the length of the list at `path`, if present.
  pub fn list_len(&mut self, path: &str, min: usize, max: Option<usize>) -> bool {
    let Some(list) = lookup_path(self.params, path).and_then(Value::as_array) else {
      return true;
    };
    let check = format!("ListLength [{path}]");
    let len = list.len();
    let too_long = max.is_some_and(|max| len > max);
    if len < min || too_long {
      let bound = match max {
        Some(max) => format!("between {min} and {max}"),
        None => format!("at least {min}"),
      };
      self.fail(
        check,
        LintCode::InvalidField,
        format!("Expected {bound} entries, found {len}"),
      );
      false
    } else {
      self.record(check, CheckResult::ok());
      true
    }
  }

  /// Bound the integer at `path`, if present and an integer.
  pub fn integer_range(&mut self, path: &str, min: i64, max: Option<i64>) -> bool {
    let Some(n) = lookup_path(self.params, path).and_then(Value::as_i64) else {
      return true;
    };
    let check = format!("Range [{path}]");
    if n < min || max.is_some_and(|max| n > max) {
      self.fail(
        check,
        LintCode::InvalidField,
        format!("Value {n} is out of range"),
      );
      false
    } else {
      self.record(check, CheckResult::ok());
      true
    }
  }

  /// Require the string at `path`, if present, to be one of `allowed`.
  pub fn one_of(&mut self, path: &str, allowed: &[&str]) -> bool {
    let Some(value) = lookup_path(self.params, path) else {
      return true;
    };
    let check = format!("OneOf [{path}]");
    match value.as_str() {
      Some(s) if allowed.contains(&s) => {
        self.record(check, CheckResult::ok());
        true
      }
      _ => {
        self.fail(
          check,
          LintCode::InvalidField,
          format!("Expected one of {}", allowed.join(", ")),
        );
        false
      }
    }
  }

  /// Validate the whole parameter map against a typed schema.
  pub fn parse<T: DeserializeOwned>(&mut self) -> Option<T> {
    match serde_json::from_value(Value::Object(self.params.clone())) {
      Ok(parsed) => {
        self.record("ParamsValid", CheckResult::ok());
        Some(parsed)
      }
      Err(e) => {
        self.fail("ParamsValid", LintCode::InvalidField, e.to_string());
        None
      }
    }
  }

  pub fn checks(&self) -> &BTreeMap<String, CheckResult> {
    &self.checks
  }

  pub fn into_checks(self) -> BTreeMap<String, CheckResult> {
    self.checks
  }

  pub fn is_valid(&self) -> bool {
    self.checks.values().all(|c| c.pass)
  }
}
