// src/dag/stage_info.rs

//! Stage metadata and per-run state.

use crate::config::model::StageConfig;
use crate::types::Status;

pub type StageName = String;

/// Static stage information plus its state in the current run.
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub name: StageName,
    /// Direct dependencies (names in `after = [...]`).
    pub deps: Vec<StageName>,
    /// A failure of this stage does not block its dependents.
    pub continue_on_failure: bool,
    pub run_state: Status,
}

impl StageInfo {
    pub fn new(name: impl Into<StageName>, deps: Vec<StageName>) -> Self {
        Self {
            name: name.into(),
            deps,
            continue_on_failure: false,
            run_state: Status::Pending,
        }
    }

    pub fn continue_on_failure(mut self, yes: bool) -> Self {
        self.continue_on_failure = yes;
        self
    }

    pub fn from_config(cfg: &StageConfig) -> Self {
        Self::new(cfg.name.clone(), cfg.after.clone()).continue_on_failure(cfg.continue_on_failure)
    }
}

/// A stage the scheduler wants dispatched now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledStage {
    pub name: StageName,
    /// Monotonically increasing run identifier shared by every stage of
    /// the same workflow run.
    pub run_id: u64,
}
