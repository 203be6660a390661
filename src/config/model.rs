// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{ConcurrencyMode, ConfigDuration};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [defaults]
/// max_attempts = 3
/// backoff = "200ms"
///
/// [agent.trainer]
/// failure_threshold = 3
///
/// [agent.trainer.workflow.fit]
/// max_concurrent_stages = 2
///
/// [[agent.trainer.workflow.fit.stage]]
/// name = "prepare"
/// mode = "sequential"
///
/// [[agent.trainer.workflow.fit.stage.task]]
/// name = "load"
/// operation = "shell"
/// outputs = ["dataset"]
/// params = { cmd = "echo data.csv" }
/// ```
///
/// All sections except `agent` are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Fallback values from `[defaults]`.
    #[serde(default)]
    pub defaults: DefaultSection,

    /// All agents from `[agent.<name>]`, keyed by agent name.
    #[serde(default)]
    pub agent: BTreeMap<String, AgentConfig>,
}

/// A validated configuration file.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`, which
/// runs every structural check (names, dependencies, key collisions,
/// cycles). Each `AgentConfig` carries its own name.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub defaults: DefaultSection,
    pub agent: BTreeMap<String, AgentConfig>,
}

impl ConfigFile {
    /// Construct without validation. Callers must have validated `agent`.
    pub(crate) fn new_unchecked(
        defaults: DefaultSection,
        agent: BTreeMap<String, AgentConfig>,
    ) -> Self {
        Self { defaults, agent }
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agent.values()
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultSection {
    /// Attempts per task, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_backoff")]
    pub backoff: ConfigDuration,

    /// Factor applied to the backoff after every failed attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Per-attempt deadline; `None` means no deadline.
    #[serde(default)]
    pub task_timeout: Option<ConfigDuration>,

    /// How long a timed-out attempt may take to notice its cancellation.
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace: ConfigDuration,

    #[serde(default = "default_max_concurrent_stages")]
    pub max_concurrent_stages: usize,

    /// Consecutive workflow failures after which an agent is marked failed.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff() -> ConfigDuration {
    ConfigDuration(Duration::from_millis(100))
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_cancel_grace() -> ConfigDuration {
    ConfigDuration(Duration::from_secs(1))
}

fn default_max_concurrent_stages() -> usize {
    4
}

fn default_failure_threshold() -> u32 {
    3
}

impl Default for DefaultSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            task_timeout: None,
            cancel_grace: default_cancel_grace(),
            max_concurrent_stages: default_max_concurrent_stages(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// `[agent.<name>]` section, also the argument of `AgentManager::register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    /// Agent identity. Filled from the table key when loaded from a file.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Budget inherited by workflows that don't set their own.
    #[serde(default)]
    pub max_concurrent_stages: Option<usize>,

    /// Owned workflows keyed by name.
    #[serde(default)]
    pub workflow: BTreeMap<String, WorkflowConfig>,
}

impl AgentConfig {
    pub fn effective_failure_threshold(&self, defaults: &DefaultSection) -> u32 {
        self.failure_threshold.unwrap_or(defaults.failure_threshold)
    }
}

/// `[agent.<a>.workflow.<w>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub max_concurrent_stages: Option<usize>,

    /// Whether a `Skipped` predecessor still lets its dependents run.
    #[serde(default)]
    pub allow_skipped_dependencies: bool,

    /// Values seeded into the execution context before the first stage.
    #[serde(default)]
    pub inputs: BTreeMap<String, serde_json::Value>,

    /// Stages in declaration order.
    #[serde(default)]
    pub stage: Vec<StageConfig>,
}

impl WorkflowConfig {
    pub fn effective_max_concurrent_stages(
        &self,
        agent: &AgentConfig,
        defaults: &DefaultSection,
    ) -> usize {
        self.max_concurrent_stages
            .or(agent.max_concurrent_stages)
            .unwrap_or(defaults.max_concurrent_stages)
    }
}

/// `[[...workflow.<w>.stage]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub mode: ConcurrencyMode,

    /// Predecessor stages that must be terminal before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    /// Keep running remaining tasks after a failure, and let dependents
    /// proceed even if this stage ends up `Failed`.
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Tasks in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[[...stage.task]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskConfig {
    pub name: String,

    /// Name of a registered operation (matched case-insensitively).
    pub operation: String,

    /// Context keys the operation reads.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Context keys the operation must produce, exactly.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Free-form parameters handed to the operation.
    #[serde(default)]
    pub params: serde_json::Value,

    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub backoff: Option<ConfigDuration>,

    #[serde(default)]
    pub timeout: Option<ConfigDuration>,
}

impl TaskConfig {
    pub fn effective_max_attempts(&self, defaults: &DefaultSection) -> u32 {
        self.max_attempts.unwrap_or(defaults.max_attempts)
    }

    pub fn effective_backoff(&self, defaults: &DefaultSection) -> Duration {
        self.backoff.unwrap_or(defaults.backoff).get()
    }

    pub fn effective_timeout(&self, defaults: &DefaultSection) -> Option<Duration> {
        self.timeout.or(defaults.task_timeout).map(ConfigDuration::get)
    }
}
