// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info};

use crate::dag::{ScheduledStage, Scheduler, SchedulerStep, StageName};
use crate::types::{Status, WorkflowStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Spawn these stages.
    DispatchStages(Vec<ScheduledStage>),
    /// These stages will not run in this run.
    MarkSkipped(Vec<StageName>),
    /// The run is over.
    Finish(WorkflowStatus),
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the run loop should keep waiting for events.
    pub keep_running: bool,
}

impl CoreStep {
    pub fn dispatched(&self) -> impl Iterator<Item = &ScheduledStage> {
        self.commands.iter().flat_map(|c| match c {
            CoreCommand::DispatchStages(stages) => stages.as_slice(),
            _ => &[],
        })
    }
}

/// Translate a scheduler step into commands.
pub fn commands_from_step(scheduler: &Scheduler, step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();

    if !step.newly_skipped.is_empty() {
        commands.push(CoreCommand::MarkSkipped(step.newly_skipped));
    }
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchStages(step.newly_scheduled));
    }

    let mut keep_running = true;
    if step.run_just_finished || scheduler.is_idle() {
        let outcome = scheduler.outcome().unwrap_or(WorkflowStatus::Failed);
        commands.push(CoreCommand::Finish(outcome));
        keep_running = false;
    }

    CoreStep {
        commands,
        keep_running,
    }
}

/// Start a run. A paused start skips what it must but dispatches nothing
/// until resumed.
pub fn handle_run_start(scheduler: &mut Scheduler, paused: bool) -> CoreStep {
    scheduler.set_paused(paused);
    let step = scheduler.start_new_run();
    commands_from_step(scheduler, step)
}

pub fn handle_stage_completed(
    scheduler: &mut Scheduler,
    stage: StageName,
    status: Status,
) -> CoreStep {
    debug!(stage = %stage, ?status, "core: stage completed");
    let step = scheduler.step_completion(&stage, status);
    commands_from_step(scheduler, step)
}

pub fn handle_pause_changed(scheduler: &mut Scheduler, paused: bool) -> CoreStep {
    if paused {
        info!("workflow paused; no new stages will be dispatched");
        scheduler.set_paused(true);
        return CoreStep {
            commands: Vec::new(),
            keep_running: !scheduler.is_idle(),
        };
    }

    info!("workflow resumed");
    let ready = scheduler.resume();
    let step = SchedulerStep {
        newly_scheduled: ready,
        ..SchedulerStep::default()
    };
    commands_from_step(scheduler, step)
}

pub fn handle_stop_requested(scheduler: &mut Scheduler) -> CoreStep {
    let step = scheduler.abort();
    commands_from_step(scheduler, step)
}
