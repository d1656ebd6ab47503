//! Sluice Runtime
//!
//! Executes a [`sluice_workflow::WiredGraph`]. The [`Runtime`] runs the
//! phases in order (inputs, transforms, outputs); stages within a phase run
//! concurrently and a phase only starts once every stage of the previous one
//! has finished. Idempotent stages are retried on transient errors with
//! exponential backoff, and every invocation runs under a deadline.
//!
//! Shardable stages whose single source is larger than the shard size are
//! handed to the [`ShardCoordinator`], which plans record-aligned byte ranges
//! from the source's size, runs the stage once per range and composes the
//! shard outputs back into the stage's sink in order.

mod config;
mod error;
mod events;
mod result;
mod runtime;
mod shard;
mod state;

pub use config::{RuntimeConfig, compute_backoff};
pub use error::{RunError, ShardError, StageFailure};
pub use events::{ChannelNotifier, ExecutionNotifier, NoopNotifier, RunEvent};
pub use result::{RunReport, StageOutcome};
pub use runtime::Runtime;
pub use shard::{ShardCoordinator, ShardDescriptor, ShardManifest, ShardPlan, ShardSummary, partition};
pub use state::RunState;
