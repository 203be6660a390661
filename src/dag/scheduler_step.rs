// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::stage_info::{ScheduledStage, StageName};

/// Structured result of a single scheduler "step".
///
/// Tests use this to step a workflow by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Stages that became ready and were marked `Running` in this step.
    pub newly_scheduled: Vec<ScheduledStage>,
    /// Stages that were marked `Skipped` in this step.
    pub newly_skipped: Vec<StageName>,
    /// Whether this step finished the current run.
    pub run_just_finished: bool,
}
