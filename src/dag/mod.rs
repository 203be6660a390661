// src/dag/mod.rs

//! Stage graph and scheduling.
//!
//! - [`graph`] holds the immutable stage dependency graph of one workflow.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   stages are ready, which are skipped, and when the run is over.
//! - [`stage_info`] provides stage metadata and scheduled stage types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod stage_info;
pub mod state_manager;

pub use graph::StageGraph;
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
pub use stage_info::{ScheduledStage, StageInfo, StageName};
