use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::stage::Stage;

/// Constructor for a stage type.
pub type StageFactory = fn() -> Arc<dyn Stage>;

#[derive(Clone)]
struct Entry {
  name: String,
  factory: StageFactory,
}

/// Maps stage type names to factories.
///
/// Built once through [`StageRegistryBuilder`] and read-only afterwards.
/// Lookups ignore case, while [`StageRegistry::canonical_name`] reports the
/// name the type was registered under.
#[derive(Clone, Default)]
pub struct StageRegistry {
  entries: BTreeMap<String, Entry>,
}

impl StageRegistry {
  pub fn builder() -> StageRegistryBuilder {
    StageRegistryBuilder::default()
  }

  /// Instantiate the stage registered under `stage_type`.
  pub fn get(&self, stage_type: &str) -> Result<Arc<dyn Stage>, RegistryError> {
    self
      .entries
      .get(&stage_type.to_lowercase())
      .map(|entry| (entry.factory)())
      .ok_or_else(|| RegistryError::UnknownStageType {
        stage_type: stage_type.to_string(),
      })
  }

  pub fn contains(&self, stage_type: &str) -> bool {
    self.entries.contains_key(&stage_type.to_lowercase())
  }

  /// The name `stage_type` was registered under.
  pub fn canonical_name(&self, stage_type: &str) -> Option<&str> {
    self
      .entries
      .get(&stage_type.to_lowercase())
      .map(|entry| entry.name.as_str())
  }

  /// Registered type names, sorted case-insensitively.
  pub fn names(&self) -> Vec<&str> {
    self.entries.values().map(|e| e.name.as_str()).collect()
  }

  /// Help text of a stage type.
  pub fn describe(&self, stage_type: &str) -> Result<&'static str, RegistryError> {
    Ok(self.get(stage_type)?.describe())
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl std::fmt::Debug for StageRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageRegistry")
      .field("types", &self.names())
      .finish()
  }
}

/// Collects factories for a [`StageRegistry`].
#[derive(Default)]
pub struct StageRegistryBuilder {
  entries: Vec<Entry>,
}

impl StageRegistryBuilder {
  pub fn register(mut self, name: impl Into<String>, factory: StageFactory) -> Self {
    self.entries.push(Entry {
      name: name.into(),
      factory,
    });
    self
  }

  pub fn build(self) -> Result<StageRegistry, RegistryError> {
    let mut entries = BTreeMap::new();
    for entry in self.entries {
      let key = entry.name.to_lowercase();
      if entries.contains_key(&key) {
        return Err(RegistryError::DuplicateStageType {
          stage_type: entry.name,
        });
      }
      entries.insert(key, entry);
    }
    Ok(StageRegistry { entries })
  }
}
