// src/exec/task_runner.rs

//! Running a single task: input projection, attempts with retry/backoff,
//! per-attempt deadlines, and the output contract check.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::context::{project, ContextMap};
use crate::exec::failure::{Failure, FailureKind};
use crate::exec::operation::{Operation, OperationError, TaskContext};
use crate::types::Status;

/// Upper bound on any single retry delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry policy for one task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always >= 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub backoff: Duration,
    /// Growth factor applied after each further failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(100),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failed_attempt` (1-based) before the next one.
    ///
    /// Saturates at [`MAX_BACKOFF`]; a zero `backoff` always yields zero.
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(failed_attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

/// A fully resolved task, ready to run.
#[derive(Clone)]
pub struct TaskSpec {
    pub name: String,
    /// Name the operation was resolved from (for diagnostics).
    pub operation_name: String,
    pub operation: Arc<dyn Operation>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: Value,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    pub cancel_grace: Duration,
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("operation", &self.operation_name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Outcome of running one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub name: String,
    pub status: Status,
    /// Attempts actually started.
    pub attempts: u32,
    pub duration: Duration,
    /// Declared outputs; empty unless `status == Succeeded`.
    pub outputs: ContextMap,
    pub failure: Option<Failure>,
    /// Failed attempts that were followed by a retry, in order.
    pub attempt_failures: Vec<Failure>,
}

impl TaskReport {
    /// Report for a task that never started (halted stage or stop request).
    pub fn skipped(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: Status::Skipped,
            attempts: 0,
            duration: Duration::ZERO,
            outputs: ContextMap::new(),
            failure: None,
            attempt_failures: Vec::new(),
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }
}

/// Names used to label the attempt context and logs.
#[derive(Debug, Clone, Default)]
pub struct TaskScope {
    pub workflow: String,
    pub stage: String,
}

enum AttemptError {
    Operation(OperationError),
    Timeout(Duration),
}

/// Run `spec` against `available` until it succeeds, fails terminally,
/// exhausts its retries, or is cancelled.
///
/// A stop request (`cancel`) lets a running attempt finish but prevents any
/// further attempt.
pub async fn run_task(
    spec: &TaskSpec,
    scope: &TaskScope,
    available: &ContextMap,
    cancel: &CancellationToken,
) -> TaskReport {
    let started = Instant::now();

    let mut attempt_failures: Vec<Failure> = Vec::new();
    let finish = |status: Status,
                  attempts: u32,
                  outputs: ContextMap,
                  failure: Option<Failure>,
                  attempt_failures: Vec<Failure>| TaskReport {
        name: spec.name.clone(),
        status,
        attempts,
        duration: started.elapsed(),
        outputs,
        failure,
        attempt_failures,
    };

    let inputs = match project(available, &spec.inputs) {
        Ok(view) => view,
        Err(missing) => {
            warn!(
                stage = %scope.stage,
                task = %spec.name,
                ?missing,
                "declared inputs missing from context; not running task"
            );
            let failure = Failure::new(
                FailureKind::MissingInput,
                &spec.name,
                0,
                format!("missing input key(s): {}", missing.join(", ")),
            );
            return finish(Status::Failed, 0, ContextMap::new(), Some(failure), Vec::new());
        }
    };

    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return cancelled(spec, attempt, attempt_failures, finish);
        }

        attempt += 1;
        debug!(
            stage = %scope.stage,
            task = %spec.name,
            attempt,
            max_attempts = spec.retry.max_attempts,
            "starting attempt"
        );

        let (kind, message) = match run_attempt(spec, scope, &inputs, attempt, cancel).await {
            Ok(outputs) => match check_contract(&spec.outputs, &outputs) {
                Ok(()) => {
                    info!(stage = %scope.stage, task = %spec.name, attempt, "task succeeded");
                    return finish(Status::Succeeded, attempt, outputs, None, attempt_failures);
                }
                Err(msg) => {
                    warn!(stage = %scope.stage, task = %spec.name, error = %msg, "output contract violated");
                    let failure = Failure::new(FailureKind::ContractViolation, &spec.name, attempt, msg);
                    return finish(
                        Status::Failed,
                        attempt,
                        ContextMap::new(),
                        Some(failure),
                        attempt_failures,
                    );
                }
            },
            Err(AttemptError::Operation(OperationError::Terminal(msg))) => {
                warn!(stage = %scope.stage, task = %spec.name, attempt, error = %msg, "terminal failure");
                let failure = Failure::new(FailureKind::TerminalFailure, &spec.name, attempt, msg);
                return finish(
                    Status::Failed,
                    attempt,
                    ContextMap::new(),
                    Some(failure),
                    attempt_failures,
                );
            }
            Err(AttemptError::Operation(OperationError::Cancelled)) => {
                return cancelled(spec, attempt, attempt_failures, finish);
            }
            Err(AttemptError::Operation(OperationError::Transient(msg))) => {
                (FailureKind::TransientFailure, msg)
            }
            Err(AttemptError::Timeout(limit)) => {
                (FailureKind::Timeout, format!("attempt timed out after {limit:?}"))
            }
        };

        warn!(
            stage = %scope.stage,
            task = %spec.name,
            attempt,
            max_attempts = spec.retry.max_attempts,
            %kind,
            error = %message,
            "attempt failed"
        );

        if attempt >= spec.retry.max_attempts {
            let final_kind = match kind {
                FailureKind::TransientFailure => FailureKind::TerminalFailure,
                other => other,
            };
            let failure = Failure::new(
                final_kind,
                &spec.name,
                attempt,
                format!("retries exhausted after {attempt} attempt(s): {message}"),
            );
            return finish(
                Status::Failed,
                attempt,
                ContextMap::new(),
                Some(failure),
                attempt_failures,
            );
        }

        attempt_failures.push(Failure::new(kind, &spec.name, attempt, message));

        if cancel.is_cancelled() {
            return cancelled(spec, attempt, attempt_failures, finish);
        }

        let delay = spec.retry.delay_after(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return cancelled(spec, attempt, attempt_failures, finish);
            }
        }
    }
}

fn cancelled<F>(
    spec: &TaskSpec,
    attempts: u32,
    attempt_failures: Vec<Failure>,
    finish: F,
) -> TaskReport
where
    F: Fn(Status, u32, ContextMap, Option<Failure>, Vec<Failure>) -> TaskReport,
{
    info!(task = %spec.name, attempts, "task cancelled; no further attempts");
    if attempts == 0 {
        return finish(Status::Skipped, 0, ContextMap::new(), None, attempt_failures);
    }
    let failure = Failure::new(
        FailureKind::Cancelled,
        &spec.name,
        attempts,
        "cancelled before the task could finish",
    );
    finish(Status::Failed, attempts, ContextMap::new(), Some(failure), attempt_failures)
}

/// One attempt with its own child token. On deadline the token is
/// cancelled and the body gets `cancel_grace` to return before it is dropped.
async fn run_attempt(
    spec: &TaskSpec,
    scope: &TaskScope,
    inputs: &ContextMap,
    attempt: u32,
    cancel: &CancellationToken,
) -> Result<ContextMap, AttemptError> {
    let token = cancel.child_token();
    let ctx = TaskContext {
        workflow: scope.workflow.clone(),
        stage: scope.stage.clone(),
        task: spec.name.clone(),
        attempt,
        inputs: inputs.clone(),
        outputs: spec.outputs.clone(),
        params: spec.params.clone(),
        cancel: token.clone(),
    };

    let mut fut = spec.operation.execute(ctx);

    let Some(limit) = spec.timeout else {
        return fut.await.map_err(AttemptError::Operation);
    };

    match tokio::time::timeout(limit, &mut fut).await {
        Ok(res) => res.map_err(AttemptError::Operation),
        Err(_elapsed) => {
            token.cancel();
            if tokio::time::timeout(spec.cancel_grace, &mut fut).await.is_err() {
                warn!(
                    task = %spec.name,
                    attempt,
                    grace = ?spec.cancel_grace,
                    "operation ignored cancellation after timeout; abandoning attempt"
                );
            }
            Err(AttemptError::Timeout(limit))
        }
    }
}

/// Outputs must match the declared keys exactly.
pub fn check_contract(declared: &[String], outputs: &ContextMap) -> Result<(), String> {
    let declared: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
    let produced: BTreeSet<&str> = outputs.keys().map(String::as_str).collect();

    let missing: Vec<&str> = declared.difference(&produced).copied().collect();
    let extra: Vec<&str> = produced.difference(&declared).copied().collect();

    match (missing.is_empty(), extra.is_empty()) {
        (true, true) => Ok(()),
        (false, true) => Err(format!("missing output key(s): {}", missing.join(", "))),
        (true, false) => Err(format!("unexpected output key(s): {}", extra.join(", "))),
        (false, false) => Err(format!(
            "missing output key(s): {}; unexpected output key(s): {}",
            missing.join(", "),
            extra.join(", ")
        )),
    }
}
