use std::collections::BTreeMap;

use serde::Serialize;
use sluice_config::{Phase, PipelineConfig};
use sluice_stage::{CheckResult, LintCode};
use thiserror::Error;

/// Checks recorded for one stage entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
  pub index: usize,
  /// Canonical type name when the type is registered, the raw value
  /// otherwise.
  pub stage_type: Option<String>,
  pub checks: BTreeMap<String, CheckResult>,
}

impl StageReport {
  pub fn is_valid(&self) -> bool {
    self.checks.values().all(|c| c.pass)
  }
}

/// Outcome of linting one document.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
  pub general: BTreeMap<String, CheckResult>,
  pub inputs: Vec<StageReport>,
  pub transforms: Vec<StageReport>,
  pub outputs: Vec<StageReport>,
  /// The option-merged, substituted configuration, present when runnable.
  #[serde(skip)]
  pub(crate) config: Option<PipelineConfig>,
}

impl LintResult {
  pub(crate) fn new() -> Self {
    Self {
      general: BTreeMap::new(),
      inputs: Vec::new(),
      transforms: Vec::new(),
      outputs: Vec::new(),
      config: None,
    }
  }

  pub fn phase(&self, phase: Phase) -> &[StageReport] {
    match phase {
      Phase::Inputs => &self.inputs,
      Phase::Transforms => &self.transforms,
      Phase::Outputs => &self.outputs,
    }
  }

  pub(crate) fn phase_mut(&mut self, phase: Phase) -> &mut Vec<StageReport> {
    match phase {
      Phase::Inputs => &mut self.inputs,
      Phase::Transforms => &mut self.transforms,
      Phase::Outputs => &mut self.outputs,
    }
  }

  /// Record a general check. A failure already recorded under the same name
  /// is kept.
  pub(crate) fn record(&mut self, name: &str, result: CheckResult) {
    match self.general.get(name) {
      Some(existing) if !existing.pass => {}
      _ => {
        self.general.insert(name.to_string(), result);
      }
    }
  }

  pub(crate) fn fail(&mut self, name: &str, code: LintCode, reason: impl Into<String>) {
    self.record(name, CheckResult::fail(code, reason));
  }

  /// Whether every check passed.
  pub fn is_runnable(&self) -> bool {
    self.general.values().all(|c| c.pass)
      && Phase::ALL
        .iter()
        .all(|phase| self.phase(*phase).iter().all(StageReport::is_valid))
  }

  pub fn general_errors(&self) -> Vec<LintIssue> {
    issues(&self.general)
  }

  /// Failing stages of `phase`, tagged with their type.
  pub fn stage_errors(&self, phase: Phase) -> Vec<StageErrors> {
    self
      .phase(phase)
      .iter()
      .filter(|report| !report.is_valid())
      .map(|report| StageErrors {
        index: report.index,
        stage_type: report.stage_type.clone(),
        errors: issues(&report.checks),
      })
      .collect()
  }

  /// Every failing check, grouped the way a user fixes them.
  pub fn summary(&self) -> LintSummary {
    LintSummary {
      runnable: self.is_runnable(),
      general_errors: self.general_errors(),
      inputs: self.stage_errors(Phase::Inputs),
      transforms: self.stage_errors(Phase::Transforms),
      outputs: self.stage_errors(Phase::Outputs),
    }
  }

  /// Codes of every failing check, general checks first.
  pub fn failure_codes(&self) -> Vec<LintCode> {
    let summary = self.summary();
    let stages = [&summary.inputs, &summary.transforms, &summary.outputs];
    summary
      .general_errors
      .iter()
      .chain(
        stages
          .into_iter()
          .flatten()
          .flat_map(|stage| stage.errors.iter()),
      )
      .filter_map(|issue| issue.code)
      .collect()
  }

  pub fn config(&self) -> Option<&PipelineConfig> {
    self.config.as_ref()
  }

  /// The validated configuration, or the report explaining why there is none.
  pub fn into_config(self) -> Result<PipelineConfig, LintFailure> {
    let summary = self.summary();
    match self.config {
      Some(config) if summary.runnable => Ok(config),
      _ => Err(LintFailure { summary }),
    }
  }
}

fn issues(checks: &BTreeMap<String, CheckResult>) -> Vec<LintIssue> {
  checks
    .iter()
    .filter(|(_, result)| !result.pass)
    .map(|(check, result)| LintIssue {
      check: check.clone(),
      code: result.code,
      reason: result.reason.clone().unwrap_or_default(),
    })
    .collect()
}

/// One failing check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
  pub check: String,
  pub code: Option<LintCode>,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageErrors {
  pub index: usize,
  pub stage_type: Option<String>,
  pub errors: Vec<LintIssue>,
}

/// Aggregated view of a [`LintResult`]'s failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LintSummary {
  pub runnable: bool,
  pub general_errors: Vec<LintIssue>,
  pub inputs: Vec<StageErrors>,
  pub transforms: Vec<StageErrors>,
  pub outputs: Vec<StageErrors>,
}

impl LintSummary {
  pub fn error_count(&self) -> usize {
    self.general_errors.len()
      + [&self.inputs, &self.transforms, &self.outputs]
        .iter()
        .flat_map(|stages| stages.iter())
        .map(|stage| stage.errors.len())
        .sum::<usize>()
  }
}

/// A document that did not pass linting.
#[derive(Debug, Error)]
#[error("configuration is not runnable: {} failed checks", .summary.error_count())]
pub struct LintFailure {
  pub summary: LintSummary,
}
