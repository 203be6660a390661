// src/exec/stage.rs

//! Stage executor: runs a stage's tasks sequentially or in parallel and
//! folds their reports into one stage outcome.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::context::ContextMap;
use crate::exec::failure::{Failure, FailureKind};
use crate::exec::task_runner::{run_task, TaskReport, TaskScope, TaskSpec};
use crate::types::{ConcurrencyMode, Status};

/// A fully resolved stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub name: String,
    pub mode: ConcurrencyMode,
    pub after: Vec<String>,
    pub continue_on_failure: bool,
    pub tasks: Vec<Arc<TaskSpec>>,
}

/// Outcome of running one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub status: Status,
    /// One report per declared task, in declaration order.
    pub tasks: Vec<TaskReport>,
    /// Union of the outputs of every task that succeeded.
    pub outputs: ContextMap,
    /// Failures of this stage's tasks, stamped with the stage name.
    pub failures: Vec<Failure>,
}

impl StageReport {
    fn from_tasks(name: &str, tasks: Vec<TaskReport>) -> Self {
        let status = aggregate_status(tasks.iter().map(|t| t.status));

        let mut outputs = ContextMap::new();
        let mut failures = Vec::new();
        for t in tasks.iter() {
            if t.status == Status::Succeeded {
                outputs.extend(t.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if let Some(f) = &t.failure {
                failures.push(f.clone().at_stage(name));
            }
        }

        Self {
            name: name.to_string(),
            status,
            tasks,
            outputs,
            failures,
        }
    }
}

/// Stage status from task statuses: `Failed` if any task failed, `Skipped`
/// if nothing ran at all, `Succeeded` otherwise.
pub fn aggregate_status(statuses: impl IntoIterator<Item = Status>) -> Status {
    let mut any_ran = false;
    let mut any_failed = false;

    for s in statuses {
        match s {
            Status::Failed => {
                any_failed = true;
                any_ran = true;
            }
            Status::Succeeded | Status::Running | Status::Pending => any_ran = true,
            Status::Skipped => {}
        }
    }

    if any_failed {
        Status::Failed
    } else if any_ran {
        Status::Succeeded
    } else {
        Status::Skipped
    }
}

/// Run every task of `spec` against `snapshot`, the committed workflow
/// context at the time the stage was dispatched.
pub async fn run_stage(
    spec: Arc<StageSpec>,
    workflow: String,
    snapshot: ContextMap,
    cancel: CancellationToken,
) -> StageReport {
    let scope = TaskScope {
        workflow,
        stage: spec.name.clone(),
    };

    info!(
        workflow = %scope.workflow,
        stage = %spec.name,
        mode = ?spec.mode,
        tasks = spec.tasks.len(),
        "stage started"
    );

    let tasks = match spec.mode {
        ConcurrencyMode::Sequential => run_sequential(&spec, &scope, snapshot, &cancel).await,
        ConcurrencyMode::Parallel => run_parallel(&spec, &scope, snapshot, &cancel).await,
    };

    let report = StageReport::from_tasks(&spec.name, tasks);
    info!(
        workflow = %scope.workflow,
        stage = %spec.name,
        status = ?report.status,
        "stage finished"
    );
    report
}

/// Declaration order, no overlap. Later tasks see earlier tasks' outputs.
async fn run_sequential(
    spec: &StageSpec,
    scope: &TaskScope,
    snapshot: ContextMap,
    cancel: &CancellationToken,
) -> Vec<TaskReport> {
    let mut view = snapshot;
    let mut reports = Vec::with_capacity(spec.tasks.len());
    let mut halted = false;

    for task in spec.tasks.iter() {
        if halted {
            debug!(stage = %spec.name, task = %task.name, "stage halted; skipping task");
            reports.push(TaskReport::skipped(&task.name));
            continue;
        }

        let report = run_task(task, scope, &view, cancel).await;

        match report.status {
            Status::Succeeded => {
                view.extend(report.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Status::Failed if !spec.continue_on_failure => {
                warn!(
                    stage = %spec.name,
                    task = %task.name,
                    "task failed; halting remaining tasks in stage"
                );
                halted = true;
            }
            _ => {}
        }

        reports.push(report);
    }

    reports
}

/// Fan-out/fan-in. A failing task does not cancel its siblings.
async fn run_parallel(
    spec: &StageSpec,
    scope: &TaskScope,
    snapshot: ContextMap,
    cancel: &CancellationToken,
) -> Vec<TaskReport> {
    let snapshot = Arc::new(snapshot);

    let handles: Vec<_> = spec
        .tasks
        .iter()
        .map(|task| {
            let task = Arc::clone(task);
            let scope = scope.clone();
            let snapshot = Arc::clone(&snapshot);
            let cancel = cancel.clone();
            tokio::spawn(async move { run_task(&task, &scope, &snapshot, &cancel).await })
        })
        .collect();

    let results = join_all(handles).await;

    results
        .into_iter()
        .zip(spec.tasks.iter())
        .map(|(res, task)| match res {
            Ok(report) => report,
            Err(join_err) => {
                warn!(stage = %spec.name, task = %task.name, error = %join_err, "task runner panicked");
                TaskReport {
                    name: task.name.clone(),
                    status: Status::Failed,
                    attempts: 1,
                    duration: std::time::Duration::ZERO,
                    outputs: ContextMap::new(),
                    failure: Some(Failure::new(
                        FailureKind::TerminalFailure,
                        &task.name,
                        1,
                        format!("task runner panicked: {join_err}"),
                    )),
                    attempt_failures: Vec::new(),
                }
            }
        })
        .collect()
}
