//! Sluice Stage
//!
//! The plugin contract every stage type implements, and the registry that
//! maps configuration `type` names to stage factories.
//!
//! A stage declares its [`StageMetadata`] (expected source and sink counts,
//! whether it is safe to retry or shard), validates its own parameters in
//! [`Stage::lint`] through a [`StageLinter`], and does its work in
//! [`Stage::run`] against the concrete locations the wiring resolver gave it.

mod context;
mod error;
mod linter;
mod metadata;
mod registry;
mod stage;

pub use context::StageContext;
pub use error::{RegistryError, StageError};
pub use linter::{CheckResult, FieldKind, LintCode, StageLinter, lookup_path};
pub use metadata::{Arity, StageMetadata};
pub use registry::{StageFactory, StageRegistry, StageRegistryBuilder};
pub use stage::Stage;
