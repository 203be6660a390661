// src/engine/plan.rs

//! Resolved, immutable form of a workflow: every task bound to its
//! operation and every default applied.

use std::sync::Arc;

use crate::config::model::{AgentConfig, DefaultSection, WorkflowConfig};
use crate::config::validate::validate_workflow;
use crate::dag::{Scheduler, StageInfo};
use crate::errors::Result;
use crate::exec::context::ContextMap;
use crate::exec::operation::OperationRegistry;
use crate::exec::stage::StageSpec;
use crate::exec::task_runner::{RetryPolicy, TaskSpec};

#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub name: String,
    /// Stages in declaration order.
    pub stages: Vec<Arc<StageSpec>>,
    pub max_concurrent_stages: usize,
    pub allow_skipped_dependencies: bool,
    /// Seed values for the execution context.
    pub inputs: ContextMap,
}

impl WorkflowPlan {
    /// Validate `cfg` and resolve every task's operation in `registry`.
    ///
    /// Fails with `UnknownOperation` if any task names an operation the
    /// registry doesn't know.
    pub fn build(
        name: &str,
        cfg: &WorkflowConfig,
        agent: &AgentConfig,
        defaults: &DefaultSection,
        registry: &OperationRegistry,
    ) -> Result<Self> {
        validate_workflow(name, cfg)?;

        let mut stages = Vec::with_capacity(cfg.stage.len());
        for stage in cfg.stage.iter() {
            let mut tasks = Vec::with_capacity(stage.task.len());
            for task in stage.task.iter() {
                let operation = registry.resolve(&task.name, &task.operation)?;
                tasks.push(Arc::new(TaskSpec {
                    name: task.name.clone(),
                    operation_name: task.operation.clone(),
                    operation,
                    inputs: task.inputs.clone(),
                    outputs: task.outputs.clone(),
                    params: task.params.clone(),
                    retry: RetryPolicy {
                        max_attempts: task.effective_max_attempts(defaults),
                        backoff: task.effective_backoff(defaults),
                        multiplier: defaults.backoff_multiplier,
                    },
                    timeout: task.effective_timeout(defaults),
                    cancel_grace: defaults.cancel_grace.get(),
                }));
            }

            stages.push(Arc::new(StageSpec {
                name: stage.name.clone(),
                mode: stage.mode,
                after: stage.after.clone(),
                continue_on_failure: stage.continue_on_failure,
                tasks,
            }));
        }

        Ok(Self {
            name: name.to_string(),
            stages,
            max_concurrent_stages: cfg.effective_max_concurrent_stages(agent, defaults),
            allow_skipped_dependencies: cfg.allow_skipped_dependencies,
            inputs: cfg.inputs.clone(),
        })
    }

    pub fn stage(&self, name: &str) -> Option<&Arc<StageSpec>> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Fresh scheduler for one run of this plan.
    pub fn scheduler(&self) -> Scheduler {
        let infos = self
            .stages
            .iter()
            .map(|s| {
                StageInfo::new(s.name.clone(), s.after.clone())
                    .continue_on_failure(s.continue_on_failure)
            })
            .collect();
        Scheduler::new(
            infos,
            self.max_concurrent_stages,
            self.allow_skipped_dependencies,
        )
    }
}
