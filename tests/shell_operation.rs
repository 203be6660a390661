// tests/shell_operation.rs

mod common;
use crate::common::builders::{StageConfigBuilder, TaskConfigBuilder, WorkflowConfigBuilder};
use crate::common::{init_tracing, plan_for, with_timeout};

use rias::engine::{run_workflow, RunControl};
use rias::exec::shell::{input_env_var, outputs_from_stdout};
use rias::exec::{FailureKind, OperationError, OperationRegistry};
use rias::types::{Status, WorkflowStatus};
use serde_json::json;

#[test]
fn env_var_names_are_sanitised() {
    assert_eq!(input_env_var("dataset"), "RIAS_INPUT_DATASET");
    assert_eq!(input_env_var("model.path"), "RIAS_INPUT_MODEL_PATH");
    assert_eq!(input_env_var("lr-v2"), "RIAS_INPUT_LR_V2");
}

#[test]
fn stdout_maps_onto_declared_outputs() {
    assert!(outputs_from_stdout("ignored", &[]).unwrap().is_empty());

    let one = outputs_from_stdout("  model.bin\n", &["model".to_string()]).unwrap();
    assert_eq!(one.get("model"), Some(&json!("model.bin")));

    let keys = vec!["acc".to_string(), "loss".to_string()];
    let many = outputs_from_stdout(r#"{"acc": 0.9, "loss": 0.1}"#, &keys).unwrap();
    assert_eq!(many.get("acc"), Some(&json!(0.9)));
    assert_eq!(many.get("loss"), Some(&json!(0.1)));
}

#[test]
fn several_outputs_require_a_json_object() {
    let keys = vec!["a".to_string(), "b".to_string()];

    assert!(matches!(
        outputs_from_stdout("[1, 2]", &keys),
        Err(OperationError::Terminal(_))
    ));
    assert!(matches!(
        outputs_from_stdout("not json", &keys),
        Err(OperationError::Terminal(_))
    ));
}

#[test]
fn builtins_resolve_case_insensitively() {
    let registry = OperationRegistry::with_builtins();
    assert!(registry.contains("shell"));
    assert!(registry.contains("SHELL"));
    assert!(registry.contains(" Noop "));
    assert_eq!(registry.names(), vec!["noop", "shell"]);
    assert!(registry.resolve("t", "python").is_err());
}

#[cfg(unix)]
#[tokio::test]
async fn shell_task_passes_inputs_through_env_and_stdout() {
    init_tracing();
    let registry = OperationRegistry::with_builtins();

    let workflow = WorkflowConfigBuilder::new()
        .input("name", "world")
        .stage(
            StageConfigBuilder::new("greet")
                .task(
                    TaskConfigBuilder::new("hello", "Shell")
                        .input("name")
                        .output("greeting")
                        .param("cmd", "echo \"hello $RIAS_INPUT_NAME\"")
                        .build(),
                )
                .build(),
        )
        .stage(
            StageConfigBuilder::new("shout")
                .after("greet")
                .task(
                    TaskConfigBuilder::new("upper", "shell")
                        .input("greeting")
                        .output("loud")
                        .param("cmd", "echo \"$RIAS_INPUT_GREETING\" | tr a-z A-Z")
                        .build(),
                )
                .build(),
        )
        .build();
    let plan = plan_for(workflow, &registry);

    let (control, _cancel) = RunControl::detached();
    let report = with_timeout(run_workflow(plan, control)).await;

    assert_eq!(report.status, WorkflowStatus::Succeeded);
    assert_eq!(report.context.get("greeting"), Some(&json!("hello world")));
    assert_eq!(report.context.get("loud"), Some(&json!("HELLO WORLD")));
}

#[cfg(unix)]
#[tokio::test]
async fn non_zero_exit_is_retried_then_fails() {
    let registry = OperationRegistry::with_builtins();

    let workflow = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("broken")
                .task(
                    TaskConfigBuilder::new("exit", "shell")
                        .param("cmd", "exit 3")
                        .max_attempts(2)
                        .build(),
                )
                .build(),
        )
        .build();
    let plan = plan_for(workflow, &registry);

    let (control, _cancel) = RunControl::detached();
    let report = with_timeout(run_workflow(plan, control)).await;

    assert_eq!(report.status, WorkflowStatus::Failed);
    let task = &report.stage("broken").expect("stage recorded").tasks[0];
    assert_eq!(task.status, Status::Failed);
    assert_eq!(task.attempts, 2);
    let failure = task.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.kind, FailureKind::TerminalFailure);
    assert!(failure.message.contains("code 3"), "{}", failure.message);
}

#[tokio::test]
async fn shell_without_cmd_param_fails_terminally() {
    let registry = OperationRegistry::with_builtins();

    let workflow = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("misconfigured")
                .task(TaskConfigBuilder::new("nothing", "shell").max_attempts(3).build())
                .build(),
        )
        .build();
    let plan = plan_for(workflow, &registry);

    let (control, _cancel) = RunControl::detached();
    let report = with_timeout(run_workflow(plan, control)).await;

    assert_eq!(report.status, WorkflowStatus::Failed);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].attempts, 1);
    assert!(report.failures[0].message.contains("cmd"));
}

#[tokio::test]
async fn noop_succeeds_without_outputs() {
    let registry = OperationRegistry::with_builtins();
    let workflow = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("idle")
                .task(TaskConfigBuilder::new("wait", "noop").build())
                .build(),
        )
        .build();
    let plan = plan_for(workflow, &registry);

    let (control, _cancel) = RunControl::detached();
    let report = with_timeout(run_workflow(plan, control)).await;
    assert_eq!(report.status, WorkflowStatus::Succeeded);
}
