//! Sluice Trigger
//!
//! HTTP surface for running pipelines. A request names a pipeline from the
//! [`PipelineCatalog`] and presents its api key; the [`TriggerService`]
//! binds the query parameters as variables, lints and wires the document,
//! and hands the wired run to the [`RunQueue`], answering immediately with
//! the run id. Progress is tracked on the [`RunBoard`], which the runtime
//! feeds through its notifier.

mod board;
mod catalog;
mod error;
mod queue;
mod routes;
mod service;

pub use board::{RunBoard, RunStatus};
pub use catalog::{PipelineCatalog, PipelineDefinition, config_text};
pub use error::TriggerError;
pub use queue::{RunQueue, RunRequest};
pub use routes::router;
pub use service::{StageHelp, TriggerAccepted, TriggerService, VariableEntry};
