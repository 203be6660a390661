// src/engine/mod.rs

//! Workflow orchestration engine.
//!
//! This module ties together:
//! - the stage scheduler
//! - the resolved workflow plan
//! - the run loop that reacts to:
//!   - stage completions
//!   - pause / resume
//!   - stop requests
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! spawns stages and commits their outputs is implemented in [`runtime`].

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::dag::StageName;
use crate::exec::context::ContextMap;
use crate::exec::failure::Failure;
use crate::exec::stage::StageReport;
use crate::exec::task_runner::TaskReport;
use crate::types::{Status, WorkflowStatus};

/// Events flowing into the workflow core.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A dispatched stage reached a terminal status.
    StageCompleted { stage: StageName, status: Status },
    /// The owning agent was paused (`true`) or resumed (`false`).
    PauseChanged(bool),
    /// Stop request: skip everything that hasn't finished.
    StopRequested,
}

/// External controls for one workflow run.
#[derive(Debug, Clone)]
pub struct RunControl {
    /// Cancelled on stop. Tasks receive child tokens of it.
    pub cancel: CancellationToken,
    /// `true` while the owner is paused.
    pub pause: watch::Receiver<bool>,
}

impl RunControl {
    pub fn new(cancel: CancellationToken, pause: watch::Receiver<bool>) -> Self {
        Self { cancel, pause }
    }

    /// Controls nobody else holds: never paused, cancelled only through
    /// the returned token.
    pub fn detached() -> (Self, CancellationToken) {
        let cancel = CancellationToken::new();
        let (_tx, pause) = watch::channel(false);
        (Self::new(cancel.clone(), pause), cancel)
    }
}

/// Hooks called by the run loop as stages progress.
///
/// All methods default to doing nothing.
pub trait RunObserver: Send + Sync {
    fn run_started(&self, _workflow: &str) {}
    fn stage_started(&self, _workflow: &str, _stage: &str) {}
    fn stage_finished(&self, _workflow: &str, _report: &StageReport) {}
    fn stage_skipped(&self, _workflow: &str, _stage: &str) {}
    fn run_finished(&self, _report: &WorkflowReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Per-stage record in a [`WorkflowReport`].
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: Status,
    /// Offset from the start of the run at which the stage was dispatched.
    pub started_at: Option<Duration>,
    /// Offset from the start of the run at which its completion was handled.
    pub finished_at: Option<Duration>,
    #[serde(skip)]
    pub tasks: Vec<TaskReport>,
}

/// Result of one workflow run.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub workflow: String,
    pub status: WorkflowStatus,
    /// One record per stage, in declaration order.
    pub stages: Vec<StageRecord>,
    pub failures: Vec<Failure>,
    /// The execution context as it stood when the run ended.
    pub context: ContextMap,
    /// Scheduling rounds that dispatched at least one stage.
    pub rounds: usize,
    pub elapsed: Duration,
}

impl WorkflowReport {
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_status(&self, name: &str) -> Option<Status> {
        self.stage(name).map(|s| s.status)
    }
}

pub mod core;
pub mod event_handlers;
pub mod plan;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use plan::WorkflowPlan;
pub use runtime::{run_workflow, WorkflowRunner};
