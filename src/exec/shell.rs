// src/exec/shell.rs

//! Built-in operations.
//!
//! - `shell` runs `params.cmd` through the platform shell. Declared inputs are
//!   exported as `RIAS_INPUT_<KEY>` environment variables; stdout becomes the
//!   output (see [`outputs_from_stdout`]).
//! - `noop` succeeds with no outputs.

use std::process::Stdio;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::exec::context::ContextMap;
use crate::exec::operation::{Operation, OperationError, OperationFuture, TaskContext};

/// Runs a shell command per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellOperation;

impl Operation for ShellOperation {
    fn execute(&self, ctx: TaskContext) -> OperationFuture<'_> {
        Box::pin(run_shell(ctx))
    }
}

/// Succeeds immediately with an empty output map.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopOperation;

impl Operation for NoopOperation {
    fn execute(&self, _ctx: TaskContext) -> OperationFuture<'_> {
        Box::pin(async { Ok(ContextMap::new()) })
    }
}

/// Environment variable name for an input key: `RIAS_INPUT_` + the key
/// upper-cased, with every non-alphanumeric character replaced by `_`.
pub fn input_env_var(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("RIAS_INPUT_{suffix}")
}

/// Map captured stdout onto the declared outputs.
///
/// - no outputs: stdout is ignored
/// - one output: trimmed stdout as a string
/// - several outputs: stdout must be a JSON object; its entries are returned
///   as-is and checked against the declaration by the task runner
pub fn outputs_from_stdout(
    stdout: &str,
    outputs: &[String],
) -> std::result::Result<ContextMap, OperationError> {
    match outputs {
        [] => Ok(ContextMap::new()),
        [key] => {
            let mut map = ContextMap::new();
            map.insert(key.clone(), Value::String(stdout.trim().to_string()));
            Ok(map)
        }
        _ => match serde_json::from_str::<Value>(stdout.trim()) {
            Ok(Value::Object(obj)) => Ok(obj.into_iter().collect()),
            Ok(other) => Err(OperationError::terminal(format!(
                "expected a JSON object on stdout for {} outputs, got {}",
                outputs.len(),
                other
            ))),
            Err(e) => Err(OperationError::terminal(format!(
                "stdout is not valid JSON: {e}"
            ))),
        },
    }
}

async fn run_shell(ctx: TaskContext) -> std::result::Result<ContextMap, OperationError> {
    let cmd_line = ctx
        .param_str("cmd")
        .ok_or_else(|| OperationError::terminal("shell operation requires a string `cmd` param"))?
        .to_string();

    match run_shell_inner(&ctx, &cmd_line).await {
        Ok(Some(stdout)) => outputs_from_stdout(&stdout, &ctx.outputs),
        Ok(None) => Err(OperationError::Cancelled),
        Err(err) => Err(OperationError::transient(format!("{err:#}"))),
    }
}

/// Run the command to completion and return its stdout, or `None` if the
/// cancellation token fired first (the child is killed in that case).
async fn run_shell_inner(ctx: &TaskContext, cmd_line: &str) -> Result<Option<String>> {
    info!(
        task = %ctx.task,
        attempt = ctx.attempt,
        cmd = %cmd_line,
        "starting shell process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    for (key, value) in ctx.inputs.iter() {
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        cmd.env(input_env_var(key), rendered);
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", ctx.task))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_reader = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut out) = stdout {
            out.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    });

    // Always consume stderr so buffers don't fill; log at debug.
    if let Some(stderr) = stderr {
        let task_name = ctx.task.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();

            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_name, "stderr: {}", line);
            }
        });
    }

    tokio::select! {
        status_res = child.wait() => {
            let status = status_res.with_context(|| {
                format!("waiting for process of task '{}'", ctx.task)
            })?;

            let code = status.code().unwrap_or(-1);
            info!(
                task = %ctx.task,
                attempt = ctx.attempt,
                exit_code = code,
                success = status.success(),
                "shell process exited"
            );

            if !status.success() {
                anyhow::bail!("command exited with code {code}");
            }

            let stdout = stdout_reader
                .await
                .context("joining stdout reader")?
                .context("reading stdout")?;
            Ok(Some(stdout))
        }

        _ = ctx.cancel.cancelled() => {
            info!(
                task = %ctx.task,
                attempt = ctx.attempt,
                "cancellation requested; killing shell process"
            );
            if let Err(e) = child.kill().await {
                warn!(
                    task = %ctx.task,
                    error = %e,
                    "failed to kill child process on cancellation"
                );
            }
            Ok(None)
        }
    }
}
