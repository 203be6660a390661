// src/exec/operation.rs

//! Task bodies as a capability interface, plus the name → implementation
//! registry they are resolved through.
//!
//! Any type implementing [`Operation`] can back a task. Operations are looked
//! up by name once, when an agent is registered; nothing is resolved
//! dynamically while a workflow runs.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::errors::{Result, RiasError};
use crate::exec::context::ContextMap;
use crate::exec::shell::{NoopOperation, ShellOperation};

/// Boxed future returned by [`Operation::execute`].
pub type OperationFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<ContextMap, OperationError>> + Send + 'a>>;

/// How an operation body reports failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// Worth retrying under the task's retry policy.
    #[error("transient: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("terminal: {0}")]
    Terminal(String),

    /// The body noticed its cancellation token and gave up.
    #[error("cancelled")]
    Cancelled,
}

impl OperationError {
    pub fn transient(msg: impl Into<String>) -> Self {
        OperationError::Transient(msg.into())
    }

    pub fn terminal(msg: impl Into<String>) -> Self {
        OperationError::Terminal(msg.into())
    }
}

/// Everything an operation gets to see for one attempt.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub workflow: String,
    pub stage: String,
    pub task: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Read-only view restricted to the task's declared inputs.
    pub inputs: ContextMap,
    /// Keys the operation is expected to return.
    pub outputs: Vec<String>,
    pub params: Value,
    /// Cooperative cancellation; fires on stop requests and on timeouts.
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Executable contract for a task body:
/// `execute(inputContext) -> outputContext | failure`.
pub trait Operation: Send + Sync {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_>;
}

/// Registry mapping operation names to implementations.
///
/// Names are case-insensitive. Cloning is cheap; implementations are shared.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    ops: HashMap<String, Arc<dyn Operation>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.ops.keys().collect();
        names.sort();
        f.debug_struct("OperationRegistry")
            .field("operations", &names)
            .finish()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `shell` and `noop`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("shell", ShellOperation);
        registry.register("noop", NoopOperation);
        registry
    }

    /// Register `op` under `name`, returning the implementation it replaced.
    pub fn register(
        &mut self,
        name: &str,
        op: impl Operation + 'static,
    ) -> Option<Arc<dyn Operation>> {
        self.register_arc(name, Arc::new(op))
    }

    pub fn register_arc(
        &mut self,
        name: &str,
        op: Arc<dyn Operation>,
    ) -> Option<Arc<dyn Operation>> {
        self.ops.insert(name.trim().to_lowercase(), op)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve the operation for `task`, failing with `UnknownOperation`.
    pub fn resolve(&self, task: &str, operation: &str) -> Result<Arc<dyn Operation>> {
        self.get(operation).ok_or_else(|| RiasError::UnknownOperation {
            task: task.to_string(),
            operation: operation.to_string(),
        })
    }
}
