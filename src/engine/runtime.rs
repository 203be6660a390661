// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dag::ScheduledStage;
use crate::engine::core::CoreRuntime;
use crate::engine::event_handlers::{CoreCommand, CoreStep};
use crate::engine::plan::WorkflowPlan;
use crate::engine::{
    NoopObserver, RunControl, RunObserver, StageRecord, WorkflowEvent, WorkflowReport,
};
use crate::exec::context::{ContextMap, ExecutionContext};
use crate::exec::failure::{Failure, FailureKind};
use crate::exec::stage::{run_stage, StageReport};
use crate::types::{Status, WorkflowStatus};

/// Drives one workflow run.
///
/// This is the IO shell around [`CoreRuntime`], which holds the scheduling
/// semantics. The runner spawns dispatched stages, commits their outputs
/// (one commit per stage completion), and feeds completions, pause changes
/// and stop requests back into the core.
pub struct WorkflowRunner {
    plan: Arc<WorkflowPlan>,
    control: RunControl,
    observer: Arc<dyn RunObserver>,
}

impl fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("workflow", &self.plan.name)
            .finish_non_exhaustive()
    }
}

/// Mutable state of a single run, owned by the loop.
struct RunState {
    plan: Arc<WorkflowPlan>,
    observer: Arc<dyn RunObserver>,
    control: RunControl,
    context: ExecutionContext,
    started: Instant,
    records: HashMap<String, StageRecord>,
    failures: Vec<Failure>,
    tx: mpsc::Sender<StageReport>,
}

/// Run `plan` once with the given controls and no observer.
pub async fn run_workflow(plan: Arc<WorkflowPlan>, control: RunControl) -> WorkflowReport {
    WorkflowRunner::new(plan, control).run().await
}

impl WorkflowRunner {
    pub fn new(plan: Arc<WorkflowPlan>, control: RunControl) -> Self {
        Self {
            plan,
            control,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Main loop.
    ///
    /// - Starts a run and dispatches the initially ready stages.
    /// - Waits for stage reports, pause changes, or a stop request.
    /// - Executes the commands returned by the core until it says `Finish`.
    pub async fn run(self) -> WorkflowReport {
        let Self {
            plan,
            mut control,
            observer,
        } = self;

        info!(workflow = %plan.name, stages = plan.stages.len(), "workflow run started");
        observer.run_started(&plan.name);

        let mut core = CoreRuntime::new(plan.scheduler());
        // Each stage reports at most once per run.
        let (tx, mut rx) = mpsc::channel::<StageReport>(plan.stages.len().max(1));

        let records = plan
            .stages
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    StageRecord {
                        name: s.name.clone(),
                        status: Status::Pending,
                        started_at: None,
                        finished_at: None,
                        tasks: Vec::new(),
                    },
                )
            })
            .collect();

        let mut state = RunState {
            context: ExecutionContext::new(plan.inputs.clone()),
            plan: Arc::clone(&plan),
            observer,
            control: control.clone(),
            started: Instant::now(),
            records,
            failures: Vec::new(),
            tx,
        };

        let paused = *control.pause.borrow_and_update();
        let mut outcome = state.apply(core.start(paused)).await;
        let mut pause_open = true;

        while outcome.is_none() {
            let step = tokio::select! {
                biased;

                _ = control.cancel.cancelled(), if !core.is_aborted() => {
                    info!(workflow = %plan.name, "stop requested; skipping unfinished stages");
                    core.step(WorkflowEvent::StopRequested)
                }

                changed = control.pause.changed(), if pause_open => {
                    match changed {
                        Ok(()) => {
                            let paused = *control.pause.borrow_and_update();
                            core.step(WorkflowEvent::PauseChanged(paused))
                        }
                        Err(_) => {
                            debug!(workflow = %plan.name, "pause sender dropped; ignoring further pause changes");
                            pause_open = false;
                            continue;
                        }
                    }
                }

                Some(report) = rx.recv() => {
                    let event = state.complete_stage(report, core.is_aborted()).await;
                    core.step(event)
                }
            };

            outcome = state.apply(step).await;
        }

        let status = outcome.unwrap_or(WorkflowStatus::Failed);
        state.finish(&core, status).await
    }
}

impl RunState {
    /// Execute the commands of one core step. Returns the outcome once the
    /// core finishes the run.
    async fn apply(&mut self, step: CoreStep) -> Option<WorkflowStatus> {
        let mut finished = None;

        for command in step.commands {
            match command {
                CoreCommand::MarkSkipped(stages) => {
                    for stage in stages.iter() {
                        debug!(workflow = %self.plan.name, stage = %stage, "stage skipped");
                        self.observer.stage_skipped(&self.plan.name, stage);
                    }
                }
                CoreCommand::DispatchStages(stages) => {
                    for stage in stages {
                        self.dispatch(stage).await;
                    }
                }
                CoreCommand::Finish(status) => finished = Some(status),
            }
        }

        finished
    }

    async fn dispatch(&mut self, scheduled: ScheduledStage) {
        let offset = self.started.elapsed();
        if let Some(record) = self.records.get_mut(&scheduled.name) {
            record.status = Status::Running;
            record.started_at = Some(offset);
        }

        let Some(spec) = self.plan.stage(&scheduled.name).cloned() else {
            warn!(stage = %scheduled.name, "scheduled stage missing from plan; failing it");
            let report = StageReport {
                name: scheduled.name.clone(),
                status: Status::Failed,
                tasks: Vec::new(),
                outputs: ContextMap::new(),
                failures: Vec::new(),
            };
            if self.tx.send(report).await.is_err() {
                debug!("stage report channel closed");
            }
            return;
        };

        self.observer.stage_started(&self.plan.name, &spec.name);

        let snapshot = self.context.snapshot().await;
        let workflow = self.plan.name.clone();
        let cancel = self.control.cancel.clone();
        let tx = self.tx.clone();
        let name = spec.name.clone();

        let handle = tokio::spawn(run_stage(spec, workflow, snapshot, cancel));
        tokio::spawn(async move {
            let report = match handle.await {
                Ok(report) => report,
                Err(join_err) => {
                    warn!(stage = %name, error = %join_err, "stage executor panicked");
                    StageReport {
                        failures: vec![Failure::new(
                            FailureKind::TerminalFailure,
                            "",
                            0,
                            format!("stage executor panicked: {join_err}"),
                        )
                        .at_stage(&name)],
                        name,
                        status: Status::Failed,
                        tasks: Vec::new(),
                        outputs: ContextMap::new(),
                    }
                }
            };
            if tx.send(report).await.is_err() {
                debug!("workflow runner gone; dropping stage report");
            }
        });
    }

    /// Record a stage report and commit its outputs. Returns the event to
    /// feed into the core.
    ///
    /// After an abort the stage has already been marked skipped, so a late
    /// report only contributes its task details.
    async fn complete_stage(&mut self, mut report: StageReport, aborted: bool) -> WorkflowEvent {
        let offset = self.started.elapsed();
        let mut status = report.status;

        if !aborted && !report.outputs.is_empty() {
            if let Err(key) = self.context.commit(report.outputs.clone()).await {
                warn!(
                    workflow = %self.plan.name,
                    stage = %report.name,
                    key = %key,
                    "output key already present in context; failing stage"
                );
                self.failures.push(
                    Failure::new(
                        FailureKind::ContractViolation,
                        "",
                        0,
                        format!("output key '{key}' was already written"),
                    )
                    .at_stage(&report.name)
                    .at_workflow(&self.plan.name),
                );
                status = Status::Failed;
            }
        }

        self.failures.extend(
            report
                .failures
                .iter()
                .cloned()
                .map(|f| f.at_workflow(&self.plan.name)),
        );

        if let Some(record) = self.records.get_mut(&report.name) {
            record.finished_at = Some(offset);
            record.status = status;
            record.tasks = report.tasks.clone();
        }

        if aborted {
            report.status = Status::Skipped;
        }
        self.observer.stage_finished(&self.plan.name, &report);

        WorkflowEvent::StageCompleted {
            stage: report.name,
            status,
        }
    }

    async fn finish(mut self, core: &CoreRuntime, status: WorkflowStatus) -> WorkflowReport {
        let stages = self
            .plan
            .stages
            .iter()
            .filter_map(|s| {
                let mut record = self.records.remove(&s.name)?;
                if let Some(final_state) = core.run_state_of(&s.name) {
                    record.status = final_state;
                }
                Some(record)
            })
            .collect();

        let report = WorkflowReport {
            workflow: self.plan.name.clone(),
            status,
            stages,
            failures: self.failures,
            context: self.context.snapshot().await,
            rounds: core.rounds(),
            elapsed: self.started.elapsed(),
        };

        match status {
            WorkflowStatus::Succeeded => info!(
                workflow = %report.workflow,
                rounds = report.rounds,
                elapsed = ?report.elapsed,
                "workflow succeeded"
            ),
            _ => warn!(
                workflow = %report.workflow,
                status = ?status,
                failures = report.failures.len(),
                "workflow did not succeed"
            ),
        }

        self.observer.run_finished(&report);
        report
    }
}
