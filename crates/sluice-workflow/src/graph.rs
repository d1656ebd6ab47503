use std::collections::{BTreeMap, HashMap};

use crate::WiredGraph;

/// Data-flow structure between the stages of a [`WiredGraph`].
///
/// A stage is downstream of another when it reads a location the other
/// writes. Stage ids are used as node ids.
#[derive(Debug, Clone)]
pub struct Graph {
  /// Adjacency list: stage_id -> downstream stage_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: stage_id -> upstream stage_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Stages that read nothing another stage writes, in execution order.
  entry_points: Vec<String>,
  /// Location -> stage_ids writing it, in execution order.
  writers: BTreeMap<String, Vec<String>>,
  /// Locations read by some stage and written by none.
  external_sources: Vec<String>,
}

impl Graph {
  pub fn new(wired: &WiredGraph) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut writers: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for stage in wired.stages() {
      adjacency.entry(stage.stage_id.clone()).or_default();
      reverse_adjacency.entry(stage.stage_id.clone()).or_default();
      for sink in &stage.sinks {
        let entry = writers.entry(sink.clone()).or_default();
        if !entry.contains(&stage.stage_id) {
          entry.push(stage.stage_id.clone());
        }
      }
    }

    let mut external_sources = Vec::new();
    for consumer in wired.stages() {
      for source in &consumer.sources {
        let Some(producers) = writers.get(source) else {
          if !external_sources.contains(source) {
            external_sources.push(source.clone());
          }
          continue;
        };
        for producer in producers {
          if producer == &consumer.stage_id {
            continue;
          }
          let downstream = adjacency.entry(producer.clone()).or_default();
          if !downstream.contains(&consumer.stage_id) {
            downstream.push(consumer.stage_id.clone());
            reverse_adjacency
              .entry(consumer.stage_id.clone())
              .or_default()
              .push(producer.clone());
          }
        }
      }
    }

    let entry_points = wired
      .stages()
      .filter(|s| reverse_adjacency.get(&s.stage_id).is_none_or(|v| v.is_empty()))
      .map(|s| s.stage_id.clone())
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      writers,
      external_sources,
    }
  }

  /// Stages with no upstream stage.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Stages reading something `stage_id` writes.
  pub fn downstream(&self, stage_id: &str) -> &[String] {
    self
      .adjacency
      .get(stage_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Stages writing something `stage_id` reads.
  pub fn upstream(&self, stage_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(stage_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Locations read by some stage but written by none (pre-existing data).
  pub fn external_sources(&self) -> &[String] {
    &self.external_sources
  }

  /// Locations written by more than one stage, with their writers.
  pub fn conflicting_writers(&self) -> Vec<(&str, &[String])> {
    self
      .writers
      .iter()
      .filter(|(_, stages)| stages.len() > 1)
      .map(|(location, stages)| (location.as_str(), stages.as_slice()))
      .collect()
  }
}
