// src/agent/snapshot.rs

//! Point-in-time, serializable views of an agent and its workflows.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::agent::health::HealthRecord;
use crate::engine::{StageRecord, WorkflowPlan, WorkflowReport};
use crate::exec::failure::Failure;
use crate::exec::stage::StageReport;
use crate::exec::task_runner::TaskReport;
use crate::types::{AgentState, Status, WorkflowStatus};

#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    pub agent: String,
    pub state: AgentState,
    pub health: HealthRecord,
    /// Workflow runs currently in progress.
    pub active_runs: usize,
    pub workflows: BTreeMap<String, WorkflowDigest>,
}

impl AgentSnapshot {
    pub fn workflow(&self, name: &str) -> Option<&WorkflowDigest> {
        self.workflows.get(name)
    }
}

/// Latest known state of one workflow.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDigest {
    pub status: WorkflowStatus,
    /// Completed runs.
    pub runs: u64,
    pub rounds: usize,
    #[serde(serialize_with = "millis")]
    pub elapsed: Duration,
    pub stages: Vec<StageDigest>,
    /// Failures of the last finished run.
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageDigest {
    pub name: String,
    pub status: Status,
    #[serde(serialize_with = "opt_millis")]
    pub started_at: Option<Duration>,
    #[serde(serialize_with = "opt_millis")]
    pub finished_at: Option<Duration>,
    pub tasks: Vec<TaskDigest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskDigest {
    pub name: String,
    pub status: Status,
    pub attempts: u32,
    #[serde(serialize_with = "millis")]
    pub duration: Duration,
    pub last_error: Option<String>,
}

impl From<&TaskReport> for TaskDigest {
    fn from(report: &TaskReport) -> Self {
        Self {
            name: report.name.clone(),
            status: report.status,
            attempts: report.attempts,
            duration: report.duration,
            last_error: report.last_error().map(str::to_string),
        }
    }
}

impl WorkflowDigest {
    /// Digest of a workflow that has never run: everything `Pending`.
    pub fn pending(plan: &WorkflowPlan) -> Self {
        let stages = plan
            .stages
            .iter()
            .map(|s| StageDigest {
                name: s.name.clone(),
                status: Status::Pending,
                started_at: None,
                finished_at: None,
                tasks: s
                    .tasks
                    .iter()
                    .map(|t| TaskDigest {
                        name: t.name.clone(),
                        status: Status::Pending,
                        attempts: 0,
                        duration: Duration::ZERO,
                        last_error: None,
                    })
                    .collect(),
            })
            .collect();

        Self {
            status: WorkflowStatus::Pending,
            runs: 0,
            rounds: 0,
            elapsed: Duration::ZERO,
            stages,
            failures: Vec::new(),
        }
    }

    /// Reset for a new run, keeping the run counter.
    pub fn begin_run(&mut self, plan: &WorkflowPlan) {
        let runs = self.runs;
        *self = Self::pending(plan);
        self.runs = runs;
        self.status = WorkflowStatus::Running;
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageDigest> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn stage(&self, name: &str) -> Option<&StageDigest> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn set_stage_status(&mut self, name: &str, status: Status) {
        if let Some(stage) = self.stage_mut(name) {
            stage.status = status;
        }
    }

    /// Live update from a stage that just finished.
    pub fn apply_stage_report(&mut self, report: &StageReport) {
        if let Some(stage) = self.stage_mut(&report.name) {
            stage.status = report.status;
            stage.tasks = report.tasks.iter().map(TaskDigest::from).collect();
        }
    }

    /// Final update from a finished run.
    pub fn apply_report(&mut self, report: &WorkflowReport) {
        self.status = report.status;
        self.runs += 1;
        self.rounds = report.rounds;
        self.elapsed = report.elapsed;
        self.failures = report.failures.clone();
        self.stages = report.stages.iter().map(StageDigest::from).collect();
    }
}

impl From<&StageRecord> for StageDigest {
    fn from(record: &StageRecord) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status,
            started_at: record.started_at,
            finished_at: record.finished_at,
            tasks: record.tasks.iter().map(TaskDigest::from).collect(),
        }
    }
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&(d.as_millis() as u64)),
        None => s.serialize_none(),
    }
}
