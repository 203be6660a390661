// tests/stage_modes.rs

mod common;
use crate::common::builders::{StageConfigBuilder, TaskConfigBuilder, WorkflowConfigBuilder};
use crate::common::fake_ops::{
    ctx_map, EchoOutputs, FailingOperation, RecordingOperation, SlowOperation,
};
use crate::common::{init_tracing, plan_for, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use rias::config::StageConfig;
use rias::exec::stage::aggregate_status;
use rias::exec::{run_stage, ContextMap, FailureKind, OperationRegistry, StageReport, StageSpec};
use rias::types::Status;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn stage_spec(stage: StageConfig, registry: &OperationRegistry) -> Arc<StageSpec> {
    let workflow = WorkflowConfigBuilder::new().stage(stage).build();
    let plan = plan_for(workflow, registry);
    Arc::clone(&plan.stages[0])
}

async fn run(spec: Arc<StageSpec>, snapshot: ContextMap) -> StageReport {
    with_timeout(run_stage(spec, "wf".into(), snapshot, CancellationToken::new())).await
}

fn statuses(report: &StageReport) -> Vec<(&str, Status)> {
    report
        .tasks
        .iter()
        .map(|t| (t.name.as_str(), t.status))
        .collect()
}

#[tokio::test]
async fn sequential_tasks_see_earlier_outputs() {
    init_tracing();
    let recorder = RecordingOperation::new(EchoOutputs);
    let mut registry = OperationRegistry::new();
    registry.register("echo", recorder.clone());

    let spec = stage_spec(
        StageConfigBuilder::new("prepare")
            .task(TaskConfigBuilder::new("load", "echo").output("raw").build())
            .task(
                TaskConfigBuilder::new("clean", "echo")
                    .input("raw")
                    .output("clean")
                    .build(),
            )
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Succeeded);
    assert_eq!(recorder.tasks(), vec!["load", "clean"]);
    let clean = recorder.call_of("clean").expect("clean ran");
    assert_eq!(clean.inputs, ctx_map(&[("raw", "load:raw")]));
    assert_eq!(
        report.outputs,
        ctx_map(&[("raw", "load:raw"), ("clean", "clean:clean")])
    );

    // No overlap.
    let load = recorder.call_of("load").expect("load ran");
    assert!(load.finished <= clean.started);
}

#[tokio::test]
async fn sequential_failure_skips_the_rest() {
    let failing = FailingOperation::terminal("corrupt file");
    let mut registry = OperationRegistry::new();
    registry.register("echo", EchoOutputs);
    registry.register("fail", failing.clone());

    let spec = stage_spec(
        StageConfigBuilder::new("prepare")
            .task(TaskConfigBuilder::new("a", "echo").output("a").build())
            .task(TaskConfigBuilder::new("b", "fail").build())
            .task(TaskConfigBuilder::new("c", "echo").output("c").build())
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Failed);
    assert_eq!(
        statuses(&report),
        vec![
            ("a", Status::Succeeded),
            ("b", Status::Failed),
            ("c", Status::Skipped)
        ]
    );
    assert_eq!(report.outputs, ctx_map(&[("a", "a:a")]));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].stage, "prepare");
    assert_eq!(report.failures[0].task, "b");
    assert_eq!(report.failures[0].kind, FailureKind::TerminalFailure);
}

#[tokio::test]
async fn sequential_continue_on_failure_runs_remaining_tasks() {
    let mut registry = OperationRegistry::new();
    registry.register("echo", EchoOutputs);
    registry.register("fail", FailingOperation::terminal("lint error"));

    let spec = stage_spec(
        StageConfigBuilder::new("checks")
            .continue_on_failure()
            .task(TaskConfigBuilder::new("lint", "fail").build())
            .task(TaskConfigBuilder::new("test", "echo").output("junit").build())
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Failed);
    assert_eq!(
        statuses(&report),
        vec![("lint", Status::Failed), ("test", Status::Succeeded)]
    );
    assert_eq!(report.outputs, ctx_map(&[("junit", "test:junit")]));
}

#[tokio::test]
async fn parallel_tasks_overlap() {
    init_tracing();
    let recorder = RecordingOperation::new(SlowOperation::new(Duration::from_millis(100)));
    let mut registry = OperationRegistry::new();
    registry.register("slow", recorder.clone());

    let spec = stage_spec(
        StageConfigBuilder::new("features")
            .parallel()
            .task(TaskConfigBuilder::new("f1", "slow").output("f1").build())
            .task(TaskConfigBuilder::new("f2", "slow").output("f2").build())
            .task(TaskConfigBuilder::new("f3", "slow").output("f3").build())
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Succeeded);
    assert_eq!(report.outputs.len(), 3);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 3);
    let last_start = calls.iter().map(|c| c.started).max().unwrap();
    let first_finish = calls.iter().map(|c| c.finished).min().unwrap();
    assert!(last_start < first_finish, "parallel tasks did not overlap");

    // Reports stay in declaration order.
    let names: Vec<_> = report.tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["f1", "f2", "f3"]);
}

#[tokio::test]
async fn parallel_failure_does_not_cancel_siblings() {
    let mut registry = OperationRegistry::new();
    registry.register("slow", SlowOperation::new(Duration::from_millis(50)));
    registry.register("fail", FailingOperation::terminal("oom"));

    let spec = stage_spec(
        StageConfigBuilder::new("train")
            .parallel()
            .task(TaskConfigBuilder::new("small", "slow").output("small").build())
            .task(TaskConfigBuilder::new("huge", "fail").build())
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Failed);
    assert_eq!(
        statuses(&report),
        vec![("small", Status::Succeeded), ("huge", Status::Failed)]
    );
    assert_eq!(report.outputs, ctx_map(&[("small", "small:small")]));
}

#[tokio::test]
async fn parallel_tasks_do_not_see_sibling_outputs() {
    let mut registry = OperationRegistry::new();
    registry.register("echo", EchoOutputs);

    let spec = stage_spec(
        StageConfigBuilder::new("fanout")
            .parallel()
            .task(TaskConfigBuilder::new("a", "echo").output("a").build())
            .task(TaskConfigBuilder::new("b", "echo").input("a").output("b").build())
            .build(),
        &registry,
    );

    let report = run(spec, ContextMap::new()).await;

    assert_eq!(report.status, Status::Failed);
    let b = &report.tasks[1];
    assert_eq!(b.status, Status::Failed);
    assert_eq!(b.failure.as_ref().map(|f| f.kind), Some(FailureKind::MissingInput));
}

#[tokio::test]
async fn stage_reads_dispatch_snapshot() {
    let recorder = RecordingOperation::new(EchoOutputs);
    let mut registry = OperationRegistry::new();
    registry.register("echo", recorder.clone());

    let spec = stage_spec(
        StageConfigBuilder::new("eval")
            .task(
                TaskConfigBuilder::new("score", "echo")
                    .input("model")
                    .output("score")
                    .build(),
            )
            .build(),
        &registry,
    );

    let report = run(spec, ctx_map(&[("model", json!("m.bin"))])).await;

    assert_eq!(report.status, Status::Succeeded);
    assert_eq!(
        recorder.call_of("score").map(|c| c.inputs),
        Some(ctx_map(&[("model", "m.bin")]))
    );
}

#[tokio::test]
async fn cancelled_stage_runs_nothing() {
    let recorder = RecordingOperation::new(EchoOutputs);
    let mut registry = OperationRegistry::new();
    registry.register("echo", recorder.clone());

    let spec = stage_spec(
        StageConfigBuilder::new("late")
            .parallel()
            .task(TaskConfigBuilder::new("x", "echo").build())
            .task(TaskConfigBuilder::new("y", "echo").build())
            .build(),
        &registry,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = with_timeout(run_stage(spec, "wf".into(), ContextMap::new(), cancel)).await;

    assert_eq!(report.status, Status::Skipped);
    assert!(recorder.calls().is_empty());
    assert!(report.failures.is_empty());
}

#[test]
fn aggregate_status_rules() {
    use Status::*;

    assert_eq!(aggregate_status([Succeeded, Succeeded]), Succeeded);
    assert_eq!(aggregate_status([Succeeded, Failed, Skipped]), Failed);
    assert_eq!(aggregate_status([Succeeded, Skipped]), Succeeded);
    assert_eq!(aggregate_status([Skipped, Skipped]), Skipped);
    assert_eq!(aggregate_status(Vec::<Status>::new()), Skipped);
}
