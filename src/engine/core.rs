// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`WorkflowEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::WorkflowRunner`) is responsible for:
//! - spawning stages and collecting their reports
//! - committing stage outputs to the execution context
//! - watching the pause and cancel signals
//!
//! The core can be unit tested without any Tokio, channels, or processes.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    handle_pause_changed, handle_run_start, handle_stage_completed, handle_stop_requested,
    CoreStep,
};
use crate::engine::WorkflowEvent;
use crate::types::{Status, WorkflowStatus};

/// Pure core runtime state for one workflow.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    /// Begin a run, optionally in the paused state.
    pub fn start(&mut self, paused: bool) -> CoreStep {
        handle_run_start(&mut self.scheduler, paused)
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: WorkflowEvent) -> CoreStep {
        match event {
            WorkflowEvent::StageCompleted { stage, status } => {
                handle_stage_completed(&mut self.scheduler, stage, status)
            }
            WorkflowEvent::PauseChanged(paused) => handle_pause_changed(&mut self.scheduler, paused),
            WorkflowEvent::StopRequested => handle_stop_requested(&mut self.scheduler),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn is_aborted(&self) -> bool {
        self.scheduler.is_aborted()
    }

    pub fn outcome(&self) -> Option<WorkflowStatus> {
        self.scheduler.outcome()
    }

    pub fn run_state_of(&self, stage: &str) -> Option<Status> {
        self.scheduler.run_state_of(stage)
    }

    pub fn rounds(&self) -> usize {
        self.scheduler.rounds()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}
