// src/config/validate.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{AgentConfig, ConfigFile, DefaultSection, RawConfigFile, WorkflowConfig};
use crate::errors::{Result, RiasError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RiasError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let RawConfigFile { defaults, mut agent } = raw;

        ensure_has_agents(&agent)?;
        validate_defaults(&defaults)?;

        for (key, cfg) in agent.iter_mut() {
            if cfg.name.is_empty() {
                cfg.name = key.clone();
            } else if cfg.name != *key {
                return Err(RiasError::ConfigError(format!(
                    "[agent.{key}] declares a different name '{}'",
                    cfg.name
                )));
            }
            validate_agent(cfg)?;
        }

        Ok(ConfigFile::new_unchecked(defaults, agent))
    }
}

fn ensure_has_agents<V>(agents: &std::collections::BTreeMap<String, V>) -> Result<()> {
    if agents.is_empty() {
        return Err(RiasError::ConfigError(
            "config must contain at least one [agent.<name>] section".to_string(),
        ));
    }
    Ok(())
}

/// Sanity checks for `[defaults]`.
pub fn validate_defaults(defaults: &DefaultSection) -> Result<()> {
    if defaults.max_attempts == 0 {
        return Err(RiasError::ConfigError(
            "[defaults].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if defaults.max_concurrent_stages == 0 {
        return Err(RiasError::ConfigError(
            "[defaults].max_concurrent_stages must be >= 1 (got 0)".to_string(),
        ));
    }
    if defaults.failure_threshold == 0 {
        return Err(RiasError::ConfigError(
            "[defaults].failure_threshold must be >= 1 (got 0)".to_string(),
        ));
    }
    if !defaults.backoff_multiplier.is_finite() || defaults.backoff_multiplier < 1.0 {
        return Err(RiasError::ConfigError(format!(
            "[defaults].backoff_multiplier must be a finite number >= 1.0 (got {})",
            defaults.backoff_multiplier
        )));
    }
    Ok(())
}

/// Validate one agent and every workflow it owns.
///
/// Pure: the same config always yields the same result and nothing is
/// mutated, so calling it twice is harmless.
pub fn validate_agent(agent: &AgentConfig) -> Result<()> {
    if agent.name.trim().is_empty() {
        return Err(RiasError::ConfigError(
            "agent name must not be empty".to_string(),
        ));
    }
    if agent.failure_threshold == Some(0) {
        return Err(RiasError::ConfigError(format!(
            "agent '{}': failure_threshold must be >= 1 (got 0)",
            agent.name
        )));
    }
    if agent.max_concurrent_stages == Some(0) {
        return Err(RiasError::ConfigError(format!(
            "agent '{}': max_concurrent_stages must be >= 1 (got 0)",
            agent.name
        )));
    }
    if agent.workflow.is_empty() {
        return Err(RiasError::ConfigError(format!(
            "agent '{}' must own at least one workflow",
            agent.name
        )));
    }

    for (name, workflow) in agent.workflow.iter() {
        validate_workflow(name, workflow)?;
    }

    Ok(())
}

/// Validate a single workflow: names, dependencies, output keys and
/// acyclicity, in that order.
pub fn validate_workflow(name: &str, workflow: &WorkflowConfig) -> Result<()> {
    if name.trim().is_empty() {
        return Err(RiasError::ConfigError(
            "workflow name must not be empty".to_string(),
        ));
    }
    if workflow.stage.is_empty() {
        return Err(RiasError::ConfigError(format!(
            "workflow '{name}' must contain at least one stage"
        )));
    }
    if workflow.max_concurrent_stages == Some(0) {
        return Err(RiasError::ConfigError(format!(
            "workflow '{name}': max_concurrent_stages must be >= 1 (got 0)"
        )));
    }

    validate_names(name, workflow)?;
    validate_stage_dependencies(name, workflow)?;
    validate_output_keys(name, workflow)?;
    validate_stage_dag(name, workflow)?;
    Ok(())
}

fn validate_names(workflow_name: &str, workflow: &WorkflowConfig) -> Result<()> {
    let mut stages = HashSet::new();

    for stage in workflow.stage.iter() {
        if stage.name.trim().is_empty() {
            return Err(RiasError::ConfigError(format!(
                "workflow '{workflow_name}' has a stage with an empty name"
            )));
        }
        if !stages.insert(stage.name.as_str()) {
            return Err(RiasError::DuplicateName {
                kind: "stage",
                name: stage.name.clone(),
                parent: format!("workflow '{workflow_name}'"),
            });
        }
        if stage.task.is_empty() {
            return Err(RiasError::ConfigError(format!(
                "stage '{}' in workflow '{workflow_name}' must contain at least one task",
                stage.name
            )));
        }

        let mut tasks = HashSet::new();
        for task in stage.task.iter() {
            if task.name.trim().is_empty() {
                return Err(RiasError::ConfigError(format!(
                    "stage '{}' in workflow '{workflow_name}' has a task with an empty name",
                    stage.name
                )));
            }
            if !tasks.insert(task.name.as_str()) {
                return Err(RiasError::DuplicateName {
                    kind: "task",
                    name: task.name.clone(),
                    parent: format!("stage '{}'", stage.name),
                });
            }
            if task.operation.trim().is_empty() {
                return Err(RiasError::ConfigError(format!(
                    "task '{}/{}' must name an operation",
                    stage.name, task.name
                )));
            }
            if task.max_attempts == Some(0) {
                return Err(RiasError::ConfigError(format!(
                    "task '{}/{}': max_attempts must be >= 1 (got 0)",
                    stage.name, task.name
                )));
            }
        }
    }

    Ok(())
}

fn validate_stage_dependencies(workflow_name: &str, workflow: &WorkflowConfig) -> Result<()> {
    let known: HashSet<&str> = workflow.stage.iter().map(|s| s.name.as_str()).collect();

    for stage in workflow.stage.iter() {
        for dep in stage.after.iter() {
            if dep == &stage.name {
                return Err(RiasError::ConfigError(format!(
                    "stage '{}' in workflow '{workflow_name}' cannot depend on itself in `after`",
                    stage.name
                )));
            }
            if !known.contains(dep.as_str()) {
                return Err(RiasError::ConfigError(format!(
                    "stage '{}' in workflow '{workflow_name}' has unknown dependency '{}' in `after`",
                    stage.name, dep
                )));
            }
        }
    }
    Ok(())
}

/// Every context key has exactly one writer per workflow run: a seeded
/// workflow input or a single task output.
fn validate_output_keys(workflow_name: &str, workflow: &WorkflowConfig) -> Result<()> {
    let mut writers: HashMap<&str, String> = workflow
        .inputs
        .keys()
        .map(|k| (k.as_str(), "workflow inputs".to_string()))
        .collect();

    for stage in workflow.stage.iter() {
        for task in stage.task.iter() {
            let writer = format!("{}/{}", stage.name, task.name);
            for key in task.outputs.iter() {
                if let Some(first) = writers.get(key.as_str()) {
                    return Err(RiasError::KeyCollision {
                        workflow: workflow_name.to_string(),
                        key: key.clone(),
                        first: first.clone(),
                        second: writer,
                    });
                }
                writers.insert(key.as_str(), writer.clone());
            }
        }
    }
    Ok(())
}

fn validate_stage_dag(workflow_name: &str, workflow: &WorkflowConfig) -> Result<()> {
    // Edge direction: dep -> stage
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for stage in workflow.stage.iter() {
        graph.add_node(stage.name.as_str());
    }

    for stage in workflow.stage.iter() {
        for dep in stage.after.iter() {
            graph.add_edge(dep.as_str(), stage.name.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RiasError::CycleDetected {
            workflow: workflow_name.to_string(),
            message: format!("cycle involves stage '{}'", cycle.node_id()),
        }),
    }
}
