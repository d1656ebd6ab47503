use std::sync::Arc;

use sluice_config::{Phase, PipelineConfig, StageSpec, Wiring};
use sluice_stage::{Arity, StageMetadata, StageRegistry};
use sluice_storage::LocationAllocator;
use sluice_workflow::{Graph, WiredGraph, WiredStage, stage_id};
use tracing::debug;

use crate::error::WiringError;

/// Turns a linted [`PipelineConfig`] into a [`WiredGraph`].
///
/// Every omitted `sources`/`sinks` list is filled in from declaration order:
/// - omitted sinks get one fresh temporary per expected output (`Exactly(n)`
///   gives `n`, `Any` gives one); `null` gives none; explicit lists are kept,
///   padded only for stages that declare partial sink lists
/// - the first transform reads every input's sinks, each later transform
///   reads the previous transform's sinks, and every output reads the last
///   transform's sinks (or every input's sinks when there are no transforms)
///
/// Explicit lists, including `null`, are never changed.
pub struct WiringResolver {
  registry: Arc<StageRegistry>,
}

impl WiringResolver {
  pub fn new(registry: Arc<StageRegistry>) -> Self {
    Self { registry }
  }

  /// Resolve `config` for the run `run_id`, drawing temporaries from
  /// `allocator`.
  pub fn resolve(
    &self,
    config: &PipelineConfig,
    run_id: &str,
    allocator: &LocationAllocator,
  ) -> Result<WiredGraph, WiringError> {
    let mut temporaries = Vec::new();

    let inputs = self.resolve_phase(config, Phase::Inputs, allocator, &mut temporaries, |_| {
      Vec::new()
    })?;
    let input_sinks: Vec<String> = inputs.iter().flat_map(|s| s.sinks.clone()).collect();

    let mut transforms: Vec<WiredStage> = Vec::with_capacity(config.transforms.len());
    for (index, spec) in config.transforms.iter().enumerate() {
      let upstream = match transforms.last() {
        Some(previous) => previous.sinks.clone(),
        None => input_sinks.clone(),
      };
      let stage = self.resolve_stage(
        Phase::Transforms,
        index,
        spec,
        &upstream,
        allocator,
        &mut temporaries,
      )?;
      transforms.push(stage);
    }

    let output_upstream = match transforms.last() {
      Some(last) => last.sinks.clone(),
      None => input_sinks,
    };
    let outputs = self.resolve_phase(config, Phase::Outputs, allocator, &mut temporaries, |_| {
      output_upstream.clone()
    })?;

    let graph = WiredGraph {
      run_id: run_id.to_string(),
      inputs,
      transforms,
      outputs,
      options: config.options.clone(),
      temporaries,
    };
    check_single_writer(&graph)?;

    debug!(
      run_id = %run_id,
      stages = config.stage_count(),
      temporaries = graph.temporaries.len(),
      "wiring_resolved"
    );
    Ok(graph)
  }

  /// Resolve every stage of a phase whose upstream set does not depend on
  /// siblings.
  fn resolve_phase<F>(
    &self,
    config: &PipelineConfig,
    phase: Phase,
    allocator: &LocationAllocator,
    temporaries: &mut Vec<String>,
    upstream: F,
  ) -> Result<Vec<WiredStage>, WiringError>
  where
    F: Fn(usize) -> Vec<String>,
  {
    config
      .phase(phase)
      .iter()
      .enumerate()
      .map(|(index, spec)| {
        self.resolve_stage(phase, index, spec, &upstream(index), allocator, temporaries)
      })
      .collect()
  }

  fn resolve_stage(
    &self,
    phase: Phase,
    index: usize,
    spec: &StageSpec,
    upstream: &[String],
    allocator: &LocationAllocator,
    temporaries: &mut Vec<String>,
  ) -> Result<WiredStage, WiringError> {
    let id = stage_id(phase, index);
    let not_linted = |message: String| WiringError::NotLinted {
      stage_id: id.clone(),
      message,
    };

    let stage_type = self
      .registry
      .canonical_name(&spec.stage_type)
      .ok_or_else(|| not_linted(format!("unknown stage type '{}'", spec.stage_type)))?
      .to_string();
    let metadata = self
      .registry
      .get(&stage_type)
      .map_err(|e| not_linted(e.to_string()))?
      .metadata();

    if spec.sources.has_null_entry() || spec.sinks.has_null_entry() {
      return Err(not_linted("null entry in an explicit location list".to_string()));
    }

    let sinks = resolve_sinks(&spec.sinks, &metadata, allocator, temporaries);
    let sources = match &spec.sources {
      Wiring::Omitted if phase == Phase::Inputs => Vec::new(),
      Wiring::Omitted => {
        if !metadata.source_arity.accepts(upstream.len()) {
          return Err(WiringError::UnresolvableArity {
            stage_id: id,
            expected: metadata.source_arity,
            available: upstream.len(),
          });
        }
        upstream.to_vec()
      }
      Wiring::Suppressed => Vec::new(),
      explicit => explicit.locations().unwrap_or_default(),
    };

    Ok(WiredStage {
      stage_id: id,
      phase,
      index,
      stage_type,
      params: spec.params.clone(),
      sources,
      sinks,
    })
  }
}

fn resolve_sinks(
  wiring: &Wiring,
  metadata: &StageMetadata,
  allocator: &LocationAllocator,
  temporaries: &mut Vec<String>,
) -> Vec<String> {
  let mut allocate = |count: usize| -> Vec<String> {
    let fresh: Vec<String> = (0..count).map(|_| allocator.allocate()).collect();
    temporaries.extend(fresh.iter().cloned());
    fresh
  };

  match wiring {
    Wiring::Omitted => match metadata.sink_arity {
      Arity::Exactly(n) => allocate(n),
      Arity::Any => allocate(1),
    },
    Wiring::Suppressed => Vec::new(),
    explicit => {
      let mut sinks = explicit.locations().unwrap_or_default();
      if metadata.partial_sinks
        && let Arity::Exactly(n) = metadata.sink_arity
        && sinks.len() < n
      {
        sinks.extend(allocate(n - sinks.len()));
      }
      sinks
    }
  }
}

/// Every location may be written by at most one stage.
fn check_single_writer(graph: &WiredGraph) -> Result<(), WiringError> {
  let edges = Graph::new(graph);
  match edges.conflicting_writers().first() {
    Some((location, writers)) => Err(WiringError::ConflictingWriters {
      location: location.to_string(),
      writers: writers.to_vec(),
    }),
    None => Ok(()),
  }
}
