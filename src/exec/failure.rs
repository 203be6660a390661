// src/exec/failure.rs

//! Terminal failure records reported up the Task → Stage → Workflow chain.

use std::fmt;

use serde::Serialize;

/// What went wrong, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A declared input key was absent from the context.
    MissingInput,
    /// The operation returned a key set different from its declared outputs.
    ContractViolation,
    /// The last attempt exceeded its deadline.
    Timeout,
    /// A stop request arrived before the task could finish.
    Cancelled,
    /// A retryable failure. Recorded per attempt in
    /// `TaskReport::attempt_failures`; once retries run out the task's final
    /// failure is reported as `TerminalFailure`.
    TransientFailure,
    /// A non-retryable failure, or retries exhausted.
    TerminalFailure,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::MissingInput => "missing input",
            FailureKind::ContractViolation => "contract violation",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::TransientFailure => "transient failure",
            FailureKind::TerminalFailure => "terminal failure",
        };
        f.write_str(s)
    }
}

/// A task failure together with where it came from.
///
/// The task runner fills in `task` and `attempts`; the stage and workflow
/// layers stamp their own names on the way up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub workflow: String,
    pub stage: String,
    pub task: String,
    pub attempts: u32,
}

impl Failure {
    pub fn new(
        kind: FailureKind,
        task: impl Into<String>,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            workflow: String::new(),
            stage: String::new(),
            task: task.into(),
            attempts,
        }
    }

    pub fn at_stage(mut self, stage: &str) -> Self {
        self.stage = stage.to_string();
        self
    }

    pub fn at_workflow(mut self, workflow: &str) -> Self {
        self.workflow = workflow.to_string();
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}/{}/{} after {} attempt(s): {}",
            self.kind, self.workflow, self.stage, self.task, self.attempts, self.message
        )
    }
}
