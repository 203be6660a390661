#![allow(dead_code)]

use std::collections::BTreeMap;
use std::time::Duration;

use rias::config::{
    AgentConfig, ConfigFile, DefaultSection, RawConfigFile, StageConfig, TaskConfig,
    WorkflowConfig,
};
use rias::types::{ConcurrencyMode, ConfigDuration};
use serde_json::Value;

/// Defaults tuned for tests: tiny backoff, short cancel grace.
pub fn fast_defaults() -> DefaultSection {
    DefaultSection {
        backoff: ConfigDuration(Duration::from_millis(1)),
        cancel_grace: ConfigDuration(Duration::from_millis(50)),
        ..DefaultSection::default()
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                defaults: fast_defaults(),
                agent: BTreeMap::new(),
            },
        }
    }

    pub fn defaults(mut self, defaults: DefaultSection) -> Self {
        self.config.defaults = defaults;
        self
    }

    pub fn agent(mut self, agent: AgentConfig) -> Self {
        self.config.agent.insert(agent.name.clone(), agent);
        self
    }

    pub fn build_raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `AgentConfig`.
pub struct AgentConfigBuilder {
    agent: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            agent: AgentConfig {
                name: name.to_string(),
                ..AgentConfig::default()
            },
        }
    }

    pub fn workflow(mut self, name: &str, workflow: WorkflowConfig) -> Self {
        self.agent.workflow.insert(name.to_string(), workflow);
        self
    }

    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.agent.failure_threshold = Some(n);
        self
    }

    pub fn max_concurrent_stages(mut self, n: usize) -> Self {
        self.agent.max_concurrent_stages = Some(n);
        self
    }

    pub fn build(self) -> AgentConfig {
        self.agent
    }
}

/// Builder for `WorkflowConfig`.
#[derive(Default)]
pub struct WorkflowConfigBuilder {
    workflow: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.workflow.stage.push(stage);
        self
    }

    pub fn input(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.workflow.inputs.insert(key.to_string(), value.into());
        self
    }

    pub fn max_concurrent_stages(mut self, n: usize) -> Self {
        self.workflow.max_concurrent_stages = Some(n);
        self
    }

    pub fn allow_skipped_dependencies(mut self) -> Self {
        self.workflow.allow_skipped_dependencies = true;
        self
    }

    pub fn build(self) -> WorkflowConfig {
        self.workflow
    }
}

/// Builder for `StageConfig`. Sequential unless told otherwise.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            stage: StageConfig {
                name: name.to_string(),
                ..StageConfig::default()
            },
        }
    }

    pub fn parallel(mut self) -> Self {
        self.stage.mode = ConcurrencyMode::Parallel;
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.stage.after.push(dep.to_string());
        self
    }

    pub fn continue_on_failure(mut self) -> Self {
        self.stage.continue_on_failure = true;
        self
    }

    pub fn task(mut self, task: TaskConfig) -> Self {
        self.stage.task.push(task);
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str, operation: &str) -> Self {
        Self {
            task: TaskConfig {
                name: name.to_string(),
                operation: operation.to_string(),
                params: Value::Object(Default::default()),
                ..TaskConfig::default()
            },
        }
    }

    pub fn input(mut self, key: &str) -> Self {
        self.task.inputs.push(key.to_string());
        self
    }

    pub fn output(mut self, key: &str) -> Self {
        self.task.outputs.push(key.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.task.params {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.task.max_attempts = Some(n);
        self
    }

    pub fn backoff(mut self, d: Duration) -> Self {
        self.task.backoff = Some(ConfigDuration(d));
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.task.timeout = Some(ConfigDuration(d));
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
