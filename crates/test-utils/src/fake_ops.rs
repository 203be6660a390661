//! Fake operations for exercising the runner without processes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rias::exec::{ContextMap, Operation, OperationError, OperationFuture, TaskContext};
use serde_json::Value;
use tokio::time::Instant;

/// Build a context map from `(key, value)` pairs.
pub fn ctx_map<V: Into<Value> + Clone>(pairs: &[(&str, V)]) -> ContextMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone().into()))
        .collect()
}

/// Closure-backed operation.
pub struct FnOperation<F> {
    f: F,
}

impl<F> FnOperation<F>
where
    F: Fn(&TaskContext) -> Result<ContextMap, OperationError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Operation for FnOperation<F>
where
    F: Fn(&TaskContext) -> Result<ContextMap, OperationError> + Send + Sync,
{
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        let res = (self.f)(&ctx);
        Box::pin(async move { res })
    }
}

/// Always returns the same outputs.
#[derive(Clone, Default)]
pub struct StaticOperation {
    outputs: ContextMap,
}

impl StaticOperation {
    pub fn new(outputs: ContextMap) -> Self {
        Self { outputs }
    }
}

impl Operation for StaticOperation {
    fn execute(&self, _ctx: TaskContext) -> OperationFuture<'_> {
        let outputs = self.outputs.clone();
        Box::pin(async move { Ok(outputs) })
    }
}

/// Fills every declared output with `"<task>:<key>"`.
#[derive(Clone, Copy, Default)]
pub struct EchoOutputs;

impl Operation for EchoOutputs {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        let outputs = ctx
            .outputs
            .iter()
            .map(|k| (k.clone(), Value::String(format!("{}:{}", ctx.task, k))))
            .collect();
        Box::pin(async move { Ok(outputs) })
    }
}

/// Always fails; transient or terminal.
#[derive(Clone)]
pub struct FailingOperation {
    error: OperationError,
    calls: Arc<AtomicU32>,
}

impl FailingOperation {
    pub fn transient(msg: &str) -> Self {
        Self {
            error: OperationError::transient(msg),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn terminal(msg: &str) -> Self {
        Self {
            error: OperationError::terminal(msg),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Operation for FailingOperation {
    fn execute(&self, _ctx: TaskContext) -> OperationFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let err = self.error.clone();
        Box::pin(async move { Err(err) })
    }
}

/// Fails transiently for the first `fail_times` calls, then echoes its
/// declared outputs.
#[derive(Clone)]
pub struct FlakyOperation {
    fail_times: u32,
    calls: Arc<AtomicU32>,
}

impl FlakyOperation {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Operation for FlakyOperation {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = n <= self.fail_times;
        Box::pin(async move {
            if fail {
                return Err(OperationError::transient(format!("flaky failure #{n}")));
            }
            EchoOutputs.execute(ctx).await
        })
    }
}

/// Sleeps before echoing its outputs.
///
/// Cooperative instances return `Cancelled` as soon as their token fires;
/// stubborn ones ignore it.
#[derive(Clone, Copy)]
pub struct SlowOperation {
    delay: Duration,
    cooperative: bool,
}

impl SlowOperation {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            cooperative: true,
        }
    }

    pub fn stubborn(delay: Duration) -> Self {
        Self {
            delay,
            cooperative: false,
        }
    }
}

impl Operation for SlowOperation {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        let delay = self.delay;
        let cooperative = self.cooperative;
        Box::pin(async move {
            if cooperative {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => return Err(OperationError::Cancelled),
                }
            } else {
                tokio::time::sleep(delay).await;
            }
            EchoOutputs.execute(ctx).await
        })
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct Call {
    pub stage: String,
    pub task: String,
    pub attempt: u32,
    pub inputs: ContextMap,
    pub started: Instant,
    pub finished: Instant,
}

/// Wraps another operation and records every call.
#[derive(Clone)]
pub struct RecordingOperation {
    inner: Arc<dyn Operation>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl RecordingOperation {
    pub fn new(inner: impl Operation + 'static) -> Self {
        Self {
            inner: Arc::new(inner),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_of(&self, task: &str) -> Option<Call> {
        self.calls().into_iter().find(|c| c.task == task)
    }

    pub fn tasks(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.task).collect()
    }
}

impl Operation for RecordingOperation {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        Box::pin(async move {
            let started = Instant::now();
            let stage = ctx.stage.clone();
            let task = ctx.task.clone();
            let attempt = ctx.attempt;
            let inputs = ctx.inputs.clone();

            let res = self.inner.execute(ctx).await;

            self.calls.lock().unwrap().push(Call {
                stage,
                task,
                attempt,
                inputs,
                started,
                finished: Instant::now(),
            });
            res
        })
    }
}
