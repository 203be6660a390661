// tests/manager.rs

mod common;
use crate::common::builders::{
    fast_defaults, AgentConfigBuilder, ConfigFileBuilder, StageConfigBuilder, TaskConfigBuilder,
    WorkflowConfigBuilder,
};
use crate::common::fake_ops::{EchoOutputs, FailingOperation, RecordingOperation, SlowOperation};
use crate::common::{init_tracing, with_timeout};

use std::time::Duration;

use rias::agent::AgentManager;
use rias::config::{AgentConfig, WorkflowConfig};
use rias::errors::RiasError;
use rias::exec::OperationRegistry;
use rias::types::{AgentState, WorkflowStatus};

fn workflow(op: &str) -> WorkflowConfig {
    WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("extract")
                .task(TaskConfigBuilder::new("pull", op).output("rows").build())
                .build(),
        )
        .stage(
            StageConfigBuilder::new("load")
                .after("extract")
                .task(TaskConfigBuilder::new("push", "echo").input("rows").build())
                .build(),
        )
        .build()
}

fn agent(name: &str, op: &str) -> AgentConfig {
    AgentConfigBuilder::new(name)
        .workflow("etl", workflow(op))
        .build()
}

fn manager() -> AgentManager {
    let mut registry = OperationRegistry::new();
    registry.register("echo", EchoOutputs);
    registry.register("fail", FailingOperation::terminal("source down"));
    registry.register("slow", SlowOperation::new(Duration::from_secs(10)));
    AgentManager::with_defaults(registry, fast_defaults())
}

#[tokio::test]
async fn register_and_run_to_completion() {
    init_tracing();
    let manager = manager();

    let id = manager.register(agent("alpha", "echo")).await.expect("register");
    assert_eq!(id, "alpha");
    assert_eq!(
        manager.status(&id).await.expect("status").state,
        AgentState::Created
    );

    manager.start(&id).await.expect("start");
    with_timeout(manager.wait_idle(&id)).await.expect("wait");

    let snap = manager.status(&id).await.expect("status");
    assert_eq!(snap.state, AgentState::Running);
    let etl = snap.workflow("etl").expect("etl digest");
    assert_eq!(etl.status, WorkflowStatus::Succeeded);
    assert_eq!(etl.rounds, 2);
    assert!(etl.failures.is_empty());
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let manager = manager();

    assert!(matches!(
        manager.start("ghost").await,
        Err(RiasError::NotFound(id)) if id == "ghost"
    ));
    assert!(matches!(manager.status("ghost").await, Err(RiasError::NotFound(_))));
    assert!(matches!(manager.deregister("ghost").await, Err(RiasError::NotFound(_))));
    assert!(matches!(
        manager.run_workflow("ghost", "etl").await,
        Err(RiasError::NotFound(_))
    ));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let manager = manager();
    manager.register(agent("alpha", "echo")).await.expect("first");

    let err = manager.register(agent("alpha", "echo")).await.unwrap_err();
    assert!(matches!(err, RiasError::AlreadyRegistered(id) if id == "alpha"));
    assert_eq!(manager.agent_ids().await, vec!["alpha"]);
}

#[tokio::test]
async fn register_rejects_unknown_operations() {
    let manager = manager();

    let err = manager.register(agent("beta", "teleport")).await.unwrap_err();
    assert!(matches!(err, RiasError::UnknownOperation { .. }));
    assert!(manager.agent_ids().await.is_empty());
}

#[tokio::test]
async fn register_rejects_invalid_workflows() {
    let manager = manager();
    let cyclic = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("a")
                .after("b")
                .task(TaskConfigBuilder::new("t", "echo").build())
                .build(),
        )
        .stage(
            StageConfigBuilder::new("b")
                .after("a")
                .task(TaskConfigBuilder::new("t", "echo").build())
                .build(),
        )
        .build();
    let config = AgentConfigBuilder::new("loop").workflow("wf", cyclic).build();

    let err = manager.register(config).await.unwrap_err();
    assert!(matches!(err, RiasError::CycleDetected { .. }));
}

#[tokio::test]
async fn register_rejects_sibling_output_collision_before_running() {
    let recorder = RecordingOperation::new(EchoOutputs);
    let mut registry = OperationRegistry::new();
    registry.register("record", recorder.clone());
    let manager = AgentManager::with_defaults(registry, fast_defaults());

    let wf = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("train")
                .parallel()
                .task(TaskConfigBuilder::new("xgb", "record").output("model").build())
                .task(TaskConfigBuilder::new("lgbm", "record").output("model").build())
                .build(),
        )
        .build();
    let config = AgentConfigBuilder::new("trainer").workflow("fit", wf).build();

    let err = manager.register(config).await.unwrap_err();
    assert!(
        matches!(&err, RiasError::KeyCollision { key, .. } if key == "model"),
        "{err:?}"
    );
    assert!(manager.agent_ids().await.is_empty());
    assert!(manager.start("trainer").await.is_err());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn register_all_uses_name_order() {
    let manager = manager();
    let cfg = ConfigFileBuilder::new()
        .agent(agent("zeta", "echo"))
        .agent(agent("alpha", "echo"))
        .build();

    let ids = manager.register_all(&cfg).await.expect("register all");
    assert_eq!(ids, vec!["alpha", "zeta"]);
    assert_eq!(manager.agent_ids().await, vec!["alpha", "zeta"]);
}

#[tokio::test]
async fn broadcast_reports_every_agent() {
    let manager = manager();
    manager.register(agent("ok", "echo")).await.expect("ok");
    manager.register(agent("bad", "fail")).await.expect("bad");

    manager.start("ok").await.expect("start ok");
    manager.start("bad").await.expect("start bad");
    with_timeout(manager.wait_all_idle()).await;

    let all = manager.broadcast_status().await;
    assert_eq!(all.keys().collect::<Vec<_>>(), vec!["bad", "ok"]);
    assert_eq!(
        all["ok"].workflow("etl").map(|w| w.status),
        Some(WorkflowStatus::Succeeded)
    );

    let bad = all["bad"].workflow("etl").expect("etl digest");
    assert_eq!(bad.status, WorkflowStatus::Failed);
    assert_eq!(bad.failures.len(), 1);
    assert_eq!(bad.failures[0].stage, "extract");
    assert_eq!(bad.stages[1].status, rias::types::Status::Skipped);

    // Snapshots serialize for the status endpoint.
    let json = serde_json::to_value(&all).expect("serialize");
    assert_eq!(json["bad"]["workflows"]["etl"]["status"], "failed");
    assert_eq!(json["ok"]["state"], "running");
}

#[tokio::test]
async fn pause_resume_and_stop_through_the_manager() {
    let manager = manager();
    let id = manager.register(agent("svc", "slow")).await.expect("register");

    manager.start(&id).await.expect("start");
    manager.pause(&id).await.expect("pause");
    assert_eq!(manager.status(&id).await.unwrap().state, AgentState::Paused);

    manager.resume(&id).await.expect("resume");
    assert_eq!(manager.status(&id).await.unwrap().state, AgentState::Running);

    manager.stop(&id).await.expect("stop");
    with_timeout(manager.wait_idle(&id)).await.expect("wait");

    let snap = manager.status(&id).await.unwrap();
    assert_eq!(snap.state, AgentState::Stopped);
    assert_eq!(
        snap.workflow("etl").map(|w| w.status),
        Some(WorkflowStatus::Cancelled)
    );
    assert!(matches!(
        manager.start(&id).await,
        Err(RiasError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn run_workflow_starts_another_run() {
    let manager = manager();
    let id = manager.register(agent("batch", "echo")).await.expect("register");

    manager.start(&id).await.expect("start");
    with_timeout(manager.wait_idle(&id)).await.expect("wait");

    manager.run_workflow(&id, "etl").await.expect("rerun");
    with_timeout(manager.wait_idle(&id)).await.expect("wait");

    let snap = manager.status(&id).await.unwrap();
    assert_eq!(snap.workflow("etl").map(|w| w.runs), Some(2));
    assert_eq!(snap.health.total_runs, 2);

    assert!(matches!(
        manager.run_workflow(&id, "nope").await,
        Err(RiasError::WorkflowNotFound { .. })
    ));
}

#[tokio::test]
async fn busy_workflow_cannot_be_started_twice() {
    let manager = manager();
    let id = manager.register(agent("slowpoke", "slow")).await.expect("register");

    manager.start(&id).await.expect("start");
    assert!(matches!(
        manager.run_workflow(&id, "etl").await,
        Err(RiasError::WorkflowBusy { .. })
    ));

    manager.shutdown().await;
}

#[tokio::test]
async fn deregister_stops_live_agents() {
    init_tracing();
    let manager = manager();
    let id = manager.register(agent("gone", "slow")).await.expect("register");
    manager.start(&id).await.expect("start");

    let snap = manager.deregister(&id).await.expect("deregister");
    assert_eq!(snap.state, AgentState::Stopped);
    assert!(manager.agent_ids().await.is_empty());
    assert!(matches!(manager.status(&id).await, Err(RiasError::NotFound(_))));
}

#[tokio::test]
async fn unhealthy_lists_failed_agents() {
    let manager = manager();
    let config = AgentConfigBuilder::new("fragile")
        .failure_threshold(1)
        .workflow("etl", workflow("fail"))
        .build();
    manager.register(config).await.expect("fragile");
    manager.register(agent("sturdy", "echo")).await.expect("sturdy");

    manager.start("fragile").await.expect("start");
    manager.start("sturdy").await.expect("start");
    with_timeout(manager.wait_all_idle()).await;

    assert_eq!(
        manager.status("fragile").await.unwrap().state,
        AgentState::Failed
    );
    assert_eq!(
        manager.unhealthy(Duration::from_secs(60)).await,
        vec!["fragile".to_string()]
    );
}

#[tokio::test]
async fn shutdown_stops_everything_and_empties_the_registry() {
    init_tracing();
    let manager = manager();
    manager.register(agent("a", "slow")).await.expect("a");
    manager.register(agent("b", "echo")).await.expect("b");
    manager.start("a").await.expect("start a");

    let handle = manager.get("a").await.expect("handle");
    with_timeout(manager.shutdown()).await;

    assert!(manager.agent_ids().await.is_empty());
    assert_eq!(handle.state(), AgentState::Stopped);
    assert_eq!(handle.active_runs(), 0);
}
