// src/exec/mod.rs

//! Task and stage execution layer.
//!
//! - [`operation`] defines the `Operation` capability trait and the
//!   name → implementation registry.
//! - [`context`] holds the write-once workflow execution context.
//! - [`task_runner`] runs one task: input projection, retries, deadlines,
//!   output contract.
//! - [`stage`] runs a stage's tasks sequentially or in parallel and
//!   aggregates their outcome.
//! - [`shell`] provides the built-in `shell` and `noop` operations.
//! - [`failure`] defines the failure records reported upward.

pub mod context;
pub mod failure;
pub mod operation;
pub mod shell;
pub mod stage;
pub mod task_runner;

pub use context::{ContextMap, ExecutionContext};
pub use failure::{Failure, FailureKind};
pub use operation::{Operation, OperationError, OperationFuture, OperationRegistry, TaskContext};
pub use shell::{NoopOperation, ShellOperation};
pub use stage::{run_stage, StageReport, StageSpec};
pub use task_runner::{run_task, RetryPolicy, TaskReport, TaskScope, TaskSpec};
