//! Sluice Stages
//!
//! Built-in stage types. Inputs bring data into the run's storage
//! ([`FileInput`], [`HttpInput`]), transforms reshape it ([`MatchReplace`],
//! [`Compositor`]) and outputs deliver or discard it ([`FileOutput`],
//! [`Deleter`]). [`LogConfig`] only logs its resolved configuration and is
//! handy while developing a pipeline.
//!
//! [`registry`] returns the process-wide registry of these types.

mod compositor;
mod deleter;
mod file;
mod http;
mod log_config;
mod match_replace;

use std::sync::{Arc, LazyLock};

use sluice_stage::{StageRegistry, StageRegistryBuilder};

pub use compositor::{Compositor, validate_content_type};
pub use deleter::Deleter;
pub use file::{FileInput, FileOutput};
pub use http::HttpInput;
pub use log_config::LogConfig;
pub use match_replace::{MatchReplace, replace_lines};

static REGISTRY: LazyLock<Arc<StageRegistry>> = LazyLock::new(|| {
  Arc::new(
    builtins()
      .build()
      .expect("built-in stage names are unique"),
  )
});

/// A registry builder pre-loaded with every built-in stage type.
///
/// Extend it with additional types before calling `build`.
pub fn builtins() -> StageRegistryBuilder {
  StageRegistry::builder()
    .register("FileInput", || Arc::new(FileInput))
    .register("HttpInput", || Arc::new(HttpInput))
    .register("MatchReplace", || Arc::new(MatchReplace))
    .register("Compositor", || Arc::new(Compositor))
    .register("FileOutput", || Arc::new(FileOutput))
    .register("Deleter", || Arc::new(Deleter))
    .register("LogConfig", || Arc::new(LogConfig))
}

/// The process-wide registry of built-in stage types.
pub fn registry() -> Arc<StageRegistry> {
  REGISTRY.clone()
}
