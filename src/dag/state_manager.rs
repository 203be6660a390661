// src/dag/state_manager.rs

//! Per-run state management for stages in the scheduler.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::graph::StageGraph;
use crate::dag::stage_info::{ScheduledStage, StageInfo, StageName};
use crate::types::Status;

/// Where a pending stage stands with respect to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency is terminal and lets this stage run.
    Ready,
    /// At least one dependency has not finished yet.
    Waiting,
    /// A dependency ended in a way that forbids running this stage.
    Blocked,
}

/// Manages per-run state transitions for stages.
pub struct StateManager<'a> {
    graph: &'a StageGraph,
    stages: &'a mut HashMap<StageName, StageInfo>,
    allow_skipped: bool,
    run_id: u64,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a StageGraph,
        stages: &'a mut HashMap<StageName, StageInfo>,
        allow_skipped: bool,
        run_id: u64,
    ) -> Self {
        Self {
            graph,
            stages,
            allow_skipped,
            run_id,
        }
    }

    /// Reset every stage to `Pending`.
    pub fn reset(&mut self) {
        for info in self.stages.values_mut() {
            info.run_state = Status::Pending;
        }
    }

    /// Mark blocked pending stages `Skipped`, repeating until nothing
    /// changes so that skips propagate down the graph.
    pub fn skip_blocked(&mut self) -> Vec<StageName> {
        let mut skipped = Vec::new();

        loop {
            let blocked: Vec<StageName> = self
                .graph
                .stages()
                .filter(|name| {
                    self.stages.get(*name).is_some_and(|info| {
                        info.run_state == Status::Pending
                            && self.readiness_of(info) == Readiness::Blocked
                    })
                })
                .map(str::to_string)
                .collect();

            if blocked.is_empty() {
                break;
            }

            for name in blocked {
                if let Some(info) = self.stages.get_mut(&name) {
                    info.run_state = Status::Skipped;
                    debug!(
                        stage = %name,
                        run_id = self.run_id,
                        "dependency did not allow this stage to run; marking Skipped"
                    );
                }
                skipped.push(name);
            }
        }

        skipped
    }

    /// Mark every non-terminal stage `Skipped` (stop request).
    pub fn skip_all_unfinished(&mut self) -> Vec<StageName> {
        let mut skipped = Vec::new();
        for name in self.graph.stages() {
            if let Some(info) = self.stages.get_mut(name)
                && !info.run_state.is_terminal()
            {
                info.run_state = Status::Skipped;
                skipped.push(name.to_string());
            }
        }
        skipped
    }

    /// Pick ready stages in declaration order, at most `budget` of them,
    /// mark them `Running` and return them.
    pub fn collect_ready(&mut self, budget: usize) -> Vec<ScheduledStage> {
        if budget == 0 {
            return Vec::new();
        }

        let candidates: Vec<StageName> = self
            .graph
            .stages()
            .filter(|name| {
                self.stages.get(*name).is_some_and(|info| {
                    info.run_state == Status::Pending
                        && self.readiness_of(info) == Readiness::Ready
                })
            })
            .take(budget)
            .map(str::to_string)
            .collect();

        let mut ready = Vec::with_capacity(candidates.len());
        for name in candidates {
            if let Some(info) = self.stages.get_mut(&name) {
                info!(stage = %name, run_id = self.run_id, "dependencies satisfied; dispatching stage");
                info.run_state = Status::Running;
                ready.push(ScheduledStage {
                    name,
                    run_id: self.run_id,
                });
            }
        }
        ready
    }

    pub fn running_count(&self) -> usize {
        self.stages
            .values()
            .filter(|info| info.run_state == Status::Running)
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.stages.values().all(|info| info.run_state.is_terminal())
    }

    pub fn readiness_of(&self, info: &StageInfo) -> Readiness {
        ReadOnlyStateManager::new(self.stages, self.allow_skipped).readiness_of(info)
    }
}

/// Shared-borrow view for dependency checks.
pub struct ReadOnlyStateManager<'a> {
    stages: &'a HashMap<StageName, StageInfo>,
    allow_skipped: bool,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(stages: &'a HashMap<StageName, StageInfo>, allow_skipped: bool) -> Self {
        Self {
            stages,
            allow_skipped,
        }
    }

    /// A succeeded dependency always satisfies. A failed one satisfies only
    /// if it was marked `continue_on_failure`, a skipped one only if the
    /// workflow allows skipped dependencies.
    pub fn readiness_of(&self, info: &StageInfo) -> Readiness {
        let mut waiting = false;

        for dep_name in info.deps.iter() {
            let Some(dep) = self.stages.get(dep_name) else {
                warn!(stage = %info.name, dep = %dep_name, "dependency missing from stage map");
                return Readiness::Blocked;
            };

            match dep.run_state {
                Status::Succeeded => {}
                Status::Failed if dep.continue_on_failure => {}
                Status::Skipped if self.allow_skipped => {}
                Status::Pending | Status::Running => waiting = true,
                Status::Failed | Status::Skipped => return Readiness::Blocked,
            }
        }

        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }
}
