// src/agent/instance.rs

//! A running agent: owns its workflow plans, lifecycle state and health.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::health::HealthRecord;
use crate::agent::lifecycle::{next_state, LifecycleCommand};
use crate::agent::snapshot::{AgentSnapshot, WorkflowDigest};
use crate::config::model::{AgentConfig, DefaultSection};
use crate::config::validate::validate_agent;
use crate::engine::{RunControl, RunObserver, WorkflowPlan, WorkflowReport, WorkflowRunner};
use crate::errors::{Result, RiasError};
use crate::exec::operation::OperationRegistry;
use crate::exec::stage::StageReport;
use crate::types::{AgentState, Status, WorkflowStatus};

/// Handle to an agent. Cloning is cheap; all clones share state.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<Shared>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Shared {
    id: String,
    plans: BTreeMap<String, Arc<WorkflowPlan>>,
    failure_threshold: u32,
    inner: Mutex<Inner>,
    /// Cancelled on stop and on failure; every run watches it.
    cancel: CancellationToken,
    pause_tx: watch::Sender<bool>,
    /// Number of workflow runs in progress.
    active_tx: watch::Sender<usize>,
}

struct Inner {
    state: AgentState,
    health: HealthRecord,
    workflows: BTreeMap<String, WorkflowDigest>,
}

impl Agent {
    /// Validate `config` and bind every task to its operation.
    ///
    /// Fails with `UnknownOperation` before anything runs if a task names an
    /// operation missing from `registry`.
    pub fn new(
        config: &AgentConfig,
        defaults: &DefaultSection,
        registry: &OperationRegistry,
    ) -> Result<Self> {
        validate_agent(config)?;

        let mut plans = BTreeMap::new();
        let mut workflows = BTreeMap::new();
        for (name, wf) in config.workflow.iter() {
            let plan = WorkflowPlan::build(name, wf, config, defaults, registry)?;
            workflows.insert(name.clone(), WorkflowDigest::pending(&plan));
            plans.insert(name.clone(), Arc::new(plan));
        }

        let (pause_tx, _) = watch::channel(false);
        let (active_tx, _) = watch::channel(0usize);

        debug!(agent = %config.name, workflows = plans.len(), "agent created");

        Ok(Self {
            shared: Arc::new(Shared {
                id: config.name.clone(),
                plans,
                failure_threshold: config.effective_failure_threshold(defaults),
                inner: Mutex::new(Inner {
                    state: AgentState::Created,
                    health: HealthRecord::new(),
                    workflows,
                }),
                cancel: CancellationToken::new(),
                pause_tx,
                active_tx,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn state(&self) -> AgentState {
        self.shared.lock().state
    }

    pub fn workflow_names(&self) -> impl Iterator<Item = &str> {
        self.shared.plans.keys().map(String::as_str)
    }

    pub fn active_runs(&self) -> usize {
        *self.shared.active_tx.borrow()
    }

    pub fn health(&self) -> HealthRecord {
        self.shared.lock().health.clone()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let inner = self.shared.lock();
        AgentSnapshot {
            agent: self.shared.id.clone(),
            state: inner.state,
            health: inner.health.clone(),
            active_runs: self.active_runs(),
            workflows: inner.workflows.clone(),
        }
    }

    /// Created → Running launches every owned workflow once. On a paused
    /// agent this is the same as [`Agent::resume`].
    pub fn start(&self) -> Result<()> {
        let from = self.transition(LifecycleCommand::Start)?;
        match from {
            AgentState::Created => {
                let names: Vec<String> = self.shared.plans.keys().cloned().collect();
                for name in names {
                    self.spawn_run(&name)?;
                }
            }
            AgentState::Paused => self.shared.set_paused(false),
            _ => {}
        }
        Ok(())
    }

    /// No new stage is dispatched while paused; running stages finish.
    pub fn pause(&self) -> Result<()> {
        self.transition(LifecycleCommand::Pause)?;
        self.shared.set_paused(true);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(LifecycleCommand::Resume)?;
        self.shared.set_paused(false);
        Ok(())
    }

    /// Terminal. Unfinished stages are skipped and running tasks are
    /// signalled; they may finish their current attempt but won't retry.
    pub fn stop(&self) -> Result<()> {
        self.transition(LifecycleCommand::Stop)?;
        self.shared.cancel.cancel();
        Ok(())
    }

    /// Start another run of one owned workflow.
    pub fn run_workflow(&self, workflow: &str) -> Result<()> {
        let state = self.state();
        if !matches!(state, AgentState::Running | AgentState::Paused) {
            return Err(RiasError::InvalidState {
                agent: self.shared.id.clone(),
                state,
                operation: "run a workflow",
            });
        }
        self.spawn_run(workflow)
    }

    /// Wait until no workflow run is in progress.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.active_tx.subscribe();
        if rx.wait_for(|active| *active == 0).await.is_err() {
            debug!(agent = %self.shared.id, "active-run channel closed while waiting");
        }
    }

    /// Failed, or has runs in progress but no heartbeat within
    /// `max_silence`.
    pub fn is_unhealthy(&self, max_silence: Duration, now: DateTime<Utc>) -> bool {
        let active = self.active_runs();
        let inner = self.shared.lock();
        inner.state == AgentState::Failed
            || (active > 0 && inner.health.is_silent(max_silence, now))
    }

    /// Apply `cmd` and return the state it was applied to.
    fn transition(&self, cmd: LifecycleCommand) -> Result<AgentState> {
        let mut inner = self.shared.lock();
        let from = inner.state;
        if let Some(to) = next_state(&self.shared.id, from, cmd)? {
            inner.state = to;
            inner.health.beat();
            info!(agent = %self.shared.id, from = %from, to = %to, "agent state changed");
        }
        Ok(from)
    }

    fn spawn_run(&self, workflow: &str) -> Result<()> {
        let Some(plan) = self.shared.plans.get(workflow).cloned() else {
            return Err(RiasError::WorkflowNotFound {
                agent: self.shared.id.clone(),
                workflow: workflow.to_string(),
            });
        };

        {
            let mut inner = self.shared.lock();
            let digest = inner
                .workflows
                .entry(workflow.to_string())
                .or_insert_with(|| WorkflowDigest::pending(&plan));
            if digest.status == WorkflowStatus::Running {
                return Err(RiasError::WorkflowBusy {
                    agent: self.shared.id.clone(),
                    workflow: workflow.to_string(),
                });
            }
            digest.begin_run(&plan);
            inner.health.beat();
        }

        self.shared.active_tx.send_modify(|n| *n += 1);

        let control = RunControl::new(self.shared.cancel.clone(), self.shared.pause_tx.subscribe());
        let observer: Arc<dyn RunObserver> = Arc::new(AgentObserver {
            shared: Arc::clone(&self.shared),
        });
        let shared = Arc::clone(&self.shared);

        info!(agent = %self.shared.id, workflow = %workflow, "launching workflow run");
        tokio::spawn(async move {
            let report = WorkflowRunner::new(plan, control)
                .with_observer(observer)
                .run()
                .await;
            shared.finish_run(&report);
        });

        Ok(())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(agent = %self.id, "agent state mutex poisoned; continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    fn set_paused(&self, paused: bool) {
        self.pause_tx.send_replace(paused);
    }

    fn beat(&self) {
        self.lock().health.beat();
    }

    /// Fold a finished run into the digest and health record, and fail the
    /// agent once consecutive failures reach the threshold.
    fn finish_run(&self, report: &WorkflowReport) {
        let mut failed_now = false;
        {
            let mut inner = self.lock();
            if let Some(digest) = inner.workflows.get_mut(&report.workflow) {
                digest.apply_report(report);
            }

            match report.status {
                WorkflowStatus::Succeeded => inner.health.record_success(),
                WorkflowStatus::Failed => {
                    let consecutive = inner.health.record_failure();
                    warn!(
                        agent = %self.id,
                        workflow = %report.workflow,
                        consecutive,
                        threshold = self.failure_threshold,
                        "workflow run failed"
                    );
                    if consecutive >= self.failure_threshold {
                        match next_state(&self.id, inner.state, LifecycleCommand::Fail) {
                            Ok(Some(to)) => {
                                error!(
                                    agent = %self.id,
                                    consecutive,
                                    from = %inner.state,
                                    "failure threshold reached; marking agent failed"
                                );
                                inner.state = to;
                                failed_now = true;
                            }
                            Ok(None) => {}
                            Err(err) => {
                                debug!(
                                    agent = %self.id,
                                    error = %err,
                                    "failure threshold reached on a terminal agent"
                                );
                            }
                        }
                    }
                }
                _ => inner.health.record_cancelled(),
            }
        }

        if failed_now {
            self.cancel.cancel();
        }
        self.active_tx.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Keeps the live digest and heartbeat current while a run progresses.
struct AgentObserver {
    shared: Arc<Shared>,
}

impl RunObserver for AgentObserver {
    fn stage_started(&self, workflow: &str, stage: &str) {
        let mut inner = self.shared.lock();
        inner.health.beat();
        if let Some(digest) = inner.workflows.get_mut(workflow) {
            digest.set_stage_status(stage, Status::Running);
        }
    }

    fn stage_finished(&self, workflow: &str, report: &StageReport) {
        let mut inner = self.shared.lock();
        inner.health.beat();
        if let Some(digest) = inner.workflows.get_mut(workflow) {
            digest.apply_stage_report(report);
        }
    }

    fn stage_skipped(&self, workflow: &str, stage: &str) {
        let mut inner = self.shared.lock();
        if let Some(digest) = inner.workflows.get_mut(workflow) {
            digest.set_stage_status(stage, Status::Skipped);
        }
    }

    fn run_started(&self, _workflow: &str) {
        self.shared.beat();
    }
}
