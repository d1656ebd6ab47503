//! Sluice Config
//!
//! Configuration document model for sluice pipelines. A pipeline is a JSON
//! document (with `//` and `/* */` comments tolerated) listing `inputs`,
//! `transforms` and `outputs` stages plus pipeline-wide `options` and
//! user-declared `variables`.
//!
//! The linter works on the loosely-typed [`serde_json::Value`] produced by
//! [`parse_document`] so it can report every problem at once; the typed
//! [`PipelineConfig`] is only built once a document is known to be valid.

mod comments;
mod error;
mod merge;
mod phase;
mod pipeline;
mod stage;

pub use comments::strip_comments;
pub use error::ConfigError;
pub use merge::merge_missing;
pub use phase::Phase;
pub use pipeline::{PipelineConfig, ROOT_KEYS, VariableDecl, json_kind, parse_document};
pub use stage::{StageSpec, Wiring};
