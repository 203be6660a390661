// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::model::WorkflowConfig;
use crate::dag::graph::StageGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::stage_info::{ScheduledStage, StageInfo, StageName};
use crate::dag::state_manager::{ReadOnlyStateManager, Readiness, StateManager};
use crate::types::{Status, WorkflowStatus};

/// Scheduler holds the immutable stage graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding which pending stages are ready (all deps terminal and
///   permitting) and dispatching them within the concurrency budget
/// - skipping stages whose dependencies ended badly
/// - holding back dispatch while paused
/// - deciding when a run is finished and what its outcome was
///
/// It does no IO. The workflow runner feeds it stage completions and acts on
/// the [`SchedulerStep`]s it returns.
#[derive(Debug)]
pub struct Scheduler {
    graph: StageGraph,
    stages: HashMap<StageName, StageInfo>,
    max_concurrent: usize,
    allow_skipped: bool,

    run_counter: u64,
    current_run_id: Option<u64>,
    /// Stages dispatched in this run whose completion has not arrived.
    in_flight: HashSet<StageName>,
    paused: bool,
    aborted: bool,
    /// Steps that dispatched at least one stage.
    rounds: usize,
    last_outcome: Option<WorkflowStatus>,
}

impl Scheduler {
    /// `max_concurrent` is clamped to at least 1.
    pub fn new(stages: Vec<StageInfo>, max_concurrent: usize, allow_skipped: bool) -> Self {
        let graph = StageGraph::from_stages(&stages);
        let stages = stages
            .into_iter()
            .map(|info| (info.name.clone(), info))
            .collect();

        Self {
            graph,
            stages,
            max_concurrent: max_concurrent.max(1),
            allow_skipped,
            run_counter: 0,
            current_run_id: None,
            in_flight: HashSet::new(),
            paused: false,
            aborted: false,
            rounds: 0,
            last_outcome: None,
        }
    }

    /// Construct a scheduler from a validated workflow.
    pub fn from_config(cfg: &WorkflowConfig, max_concurrent: usize) -> Self {
        let infos = cfg.stage.iter().map(StageInfo::from_config).collect();
        Self::new(infos, max_concurrent, cfg.allow_skipped_dependencies)
    }

    /// Returns `true` if there is currently no active run.
    pub fn is_idle(&self) -> bool {
        self.current_run_id.is_none()
    }

    pub fn current_run_id(&self) -> Option<u64> {
        self.current_run_id
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Number of dispatched stages still awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Dispatch rounds in the current (or last) run.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Outcome of the last finished run; `None` while a run is active or
    /// before the first run.
    pub fn outcome(&self) -> Option<WorkflowStatus> {
        if self.is_idle() {
            self.last_outcome
        } else {
            None
        }
    }

    pub fn run_state_of(&self, stage: &str) -> Option<Status> {
        self.stages.get(stage).map(|info| info.run_state)
    }

    /// Stage names in declaration order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.graph.stages()
    }

    pub fn dependencies_of(&self, stage: &str) -> &[StageName] {
        self.graph.dependencies_of(stage)
    }

    /// Whether `stage` may run given its dependencies' current states.
    ///
    /// Returns `None` if the stage is unknown.
    pub fn deps_satisfied(&self, stage: &str) -> Option<bool> {
        let info = self.stages.get(stage)?;
        let ro = ReadOnlyStateManager::new(&self.stages, self.allow_skipped);
        Some(ro.readiness_of(info) == Readiness::Ready)
    }

    /// Start a new run: every stage back to `Pending`, then dispatch the
    /// initially ready stages unless paused. The pause flag carries over.
    pub fn start_new_run(&mut self) -> SchedulerStep {
        self.run_counter += 1;
        self.current_run_id = Some(self.run_counter);
        self.in_flight.clear();
        self.aborted = false;
        self.rounds = 0;
        self.last_outcome = None;

        let run_id = self.run_counter;
        StateManager::new(&self.graph, &mut self.stages, self.allow_skipped, run_id).reset();

        debug!(run_id, stages = self.graph.len(), "scheduler: starting new workflow run");

        self.advance()
    }

    /// Stop dispatching new stages until [`Scheduler::resume`].
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            debug!(run_id = self.current_run_id, paused, "scheduler: pause flag changed");
        }
        self.paused = paused;
    }

    /// Clear the pause flag and dispatch whatever became ready meanwhile.
    pub fn resume(&mut self) -> Vec<ScheduledStage> {
        self.paused = false;
        if self.current_run_id.is_none() || self.aborted {
            return Vec::new();
        }
        self.advance().newly_scheduled
    }

    /// Handle completion of a stage (production API).
    pub fn handle_completion(&mut self, stage: &str, status: Status) -> Vec<ScheduledStage> {
        self.step_completion(stage, status).newly_scheduled
    }

    /// Manual-step variant of `handle_completion` that returns a rich
    /// [`SchedulerStep`].
    pub fn step_completion(&mut self, stage: &str, status: Status) -> SchedulerStep {
        let Some(run_id) = self.current_run_id else {
            warn!(stage = %stage, "stage completion with no active run; ignoring");
            return SchedulerStep::default();
        };

        if !self.in_flight.remove(stage) {
            warn!(stage = %stage, run_id, "completion for a stage that was not dispatched; ignoring");
            return SchedulerStep::default();
        }

        if self.aborted {
            debug!(stage = %stage, run_id, "late completion after stop; state stays Skipped");
            return SchedulerStep {
                run_just_finished: self.maybe_finish_run(),
                ..SchedulerStep::default()
            };
        }

        let status = if status.is_terminal() {
            status
        } else {
            warn!(stage = %stage, ?status, "non-terminal completion status; treating as Failed");
            Status::Failed
        };

        if let Some(info) = self.stages.get_mut(stage) {
            info.run_state = status;
            match status {
                Status::Failed if !info.continue_on_failure => {
                    warn!(stage = %stage, run_id, "stage failed; dependents will be skipped")
                }
                _ => debug!(stage = %stage, run_id, ?status, "stage completed"),
            }
        }

        self.advance()
    }

    /// Stop request: every non-terminal stage becomes `Skipped` and nothing
    /// new is dispatched. The run finishes once in-flight stages report back.
    pub fn abort(&mut self) -> SchedulerStep {
        let Some(run_id) = self.current_run_id else {
            return SchedulerStep::default();
        };
        if self.aborted {
            return SchedulerStep::default();
        }

        self.aborted = true;
        let newly_skipped =
            StateManager::new(&self.graph, &mut self.stages, self.allow_skipped, run_id)
                .skip_all_unfinished();

        info!(
            run_id,
            skipped = newly_skipped.len(),
            in_flight = self.in_flight.len(),
            "scheduler: run aborted"
        );

        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped,
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Skip what is blocked, dispatch what is ready, and finish the run if
    /// everything is terminal.
    fn advance(&mut self) -> SchedulerStep {
        let Some(run_id) = self.current_run_id else {
            return SchedulerStep::default();
        };

        let mut manager =
            StateManager::new(&self.graph, &mut self.stages, self.allow_skipped, run_id);
        let newly_skipped = manager.skip_blocked();

        let newly_scheduled = if self.paused {
            Vec::new()
        } else {
            let budget = self.max_concurrent.saturating_sub(manager.running_count());
            manager.collect_ready(budget)
        };

        if !newly_scheduled.is_empty() {
            self.rounds += 1;
        }
        for s in newly_scheduled.iter() {
            self.in_flight.insert(s.name.clone());
        }

        SchedulerStep {
            newly_scheduled,
            newly_skipped,
            run_just_finished: self.maybe_finish_run(),
        }
    }

    /// Clear `current_run_id` once all stages are terminal and nothing is
    /// in flight. Returns `true` if this call finished the run.
    fn maybe_finish_run(&mut self) -> bool {
        let Some(run_id) = self.current_run_id else {
            return false;
        };

        let manager = StateManager::new(&self.graph, &mut self.stages, self.allow_skipped, run_id);
        if !manager.all_terminal() || !self.in_flight.is_empty() {
            return false;
        }

        let outcome = self.compute_outcome();
        info!(run_id, ?outcome, rounds = self.rounds, "scheduler: run finished");
        self.last_outcome = Some(outcome);
        self.current_run_id = None;
        true
    }

    fn compute_outcome(&self) -> WorkflowStatus {
        if self.aborted {
            return WorkflowStatus::Cancelled;
        }

        let failed = self.stages.values().any(|info| match info.run_state {
            Status::Failed => !info.continue_on_failure,
            Status::Skipped => !self.allow_skipped,
            _ => false,
        });

        if failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Succeeded
        }
    }
}
