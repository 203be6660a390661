#![allow(dead_code)]

pub use rias_test_utils::builders;
pub use rias_test_utils::fake_ops;
pub use rias_test_utils::{init_tracing, with_timeout, with_timeout_of};

use std::sync::Arc;

use rias::config::{AgentConfig, WorkflowConfig};
use rias::engine::WorkflowPlan;
use rias::exec::OperationRegistry;

use self::builders::{fast_defaults, AgentConfigBuilder};

/// Resolve a single workflow against `registry` using test defaults.
pub fn plan_for(workflow: WorkflowConfig, registry: &OperationRegistry) -> Arc<WorkflowPlan> {
    let agent = AgentConfigBuilder::new("test-agent")
        .workflow("wf", workflow)
        .build();
    plan_with_agent(&agent, "wf", registry)
}

pub fn plan_with_agent(
    agent: &AgentConfig,
    workflow: &str,
    registry: &OperationRegistry,
) -> Arc<WorkflowPlan> {
    let cfg = agent
        .workflow
        .get(workflow)
        .expect("workflow not present in agent config");
    let plan = WorkflowPlan::build(workflow, cfg, agent, &fast_defaults(), registry)
        .expect("failed to build workflow plan");
    Arc::new(plan)
}
