//! Sluice Workflow
//!
//! The "wired" representation of a pipeline. A [`WiredGraph`] is a linted
//! configuration after every auto-wiring decision has been made: each stage
//! carries a stable id and concrete `sources` and `sinks` lists, so the
//! orchestrator never has to reason about omitted or null wiring.
//!
//! [`Graph`] derives the producer/consumer relationships between stages from
//! the locations they share.

mod graph;
mod wired;

pub use graph::Graph;
pub use sluice_config::Phase;
pub use wired::{WiredGraph, WiredStage, stage_id};
