// tests/validation.rs

mod common;
use crate::common::builders::{
    AgentConfigBuilder, ConfigFileBuilder, StageConfigBuilder, TaskConfigBuilder,
    WorkflowConfigBuilder,
};
use crate::common::init_tracing;

use rias::config::{validate_agent, validate_workflow, ConfigFile, WorkflowConfig};
use rias::errors::RiasError;

fn task(name: &str) -> rias::config::TaskConfig {
    TaskConfigBuilder::new(name, "noop").build()
}

fn chain(stages: &[(&str, &[&str])]) -> WorkflowConfig {
    let mut wf = WorkflowConfigBuilder::new();
    for (name, after) in stages {
        let mut stage = StageConfigBuilder::new(name).task(task(&format!("{name}_t")));
        for dep in after.iter() {
            stage = stage.after(dep);
        }
        wf = wf.stage(stage.build());
    }
    wf.build()
}

#[test]
fn valid_diamond_is_accepted() {
    init_tracing();
    let wf = chain(&[("A", &[]), ("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])]);
    validate_workflow("diamond", &wf).expect("diamond should be valid");
}

#[test]
fn two_stage_cycle_is_rejected() {
    init_tracing();
    let wf = chain(&[("A", &["B"]), ("B", &["A"])]);
    let err = validate_workflow("loop", &wf).unwrap_err();
    match err {
        RiasError::CycleDetected { workflow, message } => {
            assert_eq!(workflow, "loop");
            assert!(message.contains("cycle involves stage"), "message: {message}");
        }
        other => panic!("expected CycleDetected, got {other:?}"),
    }
}

#[test]
fn longer_cycle_behind_a_root_is_rejected() {
    let wf = chain(&[("root", &[]), ("A", &["root", "C"]), ("B", &["A"]), ("C", &["B"])]);
    assert!(matches!(
        validate_workflow("wf", &wf),
        Err(RiasError::CycleDetected { .. })
    ));
}

#[test]
fn self_dependency_is_a_config_error() {
    let wf = chain(&[("A", &["A"])]);
    assert!(matches!(validate_workflow("wf", &wf), Err(RiasError::ConfigError(_))));
}

#[test]
fn unknown_dependency_is_a_config_error() {
    let wf = chain(&[("A", &["ghost"])]);
    let err = validate_workflow("wf", &wf).unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}

#[test]
fn output_key_written_twice_is_a_collision() {
    init_tracing();
    let wf = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("extract")
                .task(TaskConfigBuilder::new("a", "noop").output("rows").build())
                .build(),
        )
        .stage(
            StageConfigBuilder::new("transform")
                .after("extract")
                .task(TaskConfigBuilder::new("b", "noop").output("rows").build())
                .build(),
        )
        .build();

    match validate_workflow("etl", &wf).unwrap_err() {
        RiasError::KeyCollision {
            workflow,
            key,
            first,
            second,
        } => {
            assert_eq!(workflow, "etl");
            assert_eq!(key, "rows");
            assert_eq!(first, "extract/a");
            assert_eq!(second, "transform/b");
        }
        other => panic!("expected KeyCollision, got {other:?}"),
    }
}

#[test]
fn sibling_tasks_in_one_stage_cannot_share_an_output() {
    let wf = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("train")
                .parallel()
                .task(TaskConfigBuilder::new("xgb", "noop").output("model").build())
                .task(TaskConfigBuilder::new("lgbm", "noop").output("model").build())
                .build(),
        )
        .build();

    match validate_workflow("fit", &wf).unwrap_err() {
        RiasError::KeyCollision {
            key, first, second, ..
        } => {
            assert_eq!(key, "model");
            assert_eq!(first, "train/xgb");
            assert_eq!(second, "train/lgbm");
        }
        other => panic!("expected KeyCollision, got {other:?}"),
    }
}

#[test]
fn output_shadowing_a_workflow_input_is_a_collision() {
    let wf = WorkflowConfigBuilder::new()
        .input("seed", 1)
        .stage(
            StageConfigBuilder::new("s")
                .task(TaskConfigBuilder::new("t", "noop").output("seed").build())
                .build(),
        )
        .build();

    assert!(matches!(
        validate_workflow("wf", &wf),
        Err(RiasError::KeyCollision { first, .. }) if first == "workflow inputs"
    ));
}

#[test]
fn duplicate_names_are_rejected() {
    let dup_stage = chain(&[("A", &[]), ("A", &[])]);
    assert!(matches!(
        validate_workflow("wf", &dup_stage),
        Err(RiasError::DuplicateName { kind: "stage", .. })
    ));

    let dup_task = WorkflowConfigBuilder::new()
        .stage(StageConfigBuilder::new("s").task(task("t")).task(task("t")).build())
        .build();
    assert!(matches!(
        validate_workflow("wf", &dup_task),
        Err(RiasError::DuplicateName { kind: "task", .. })
    ));
}

#[test]
fn zero_budgets_are_rejected() {
    let wf = WorkflowConfigBuilder::new()
        .stage(
            StageConfigBuilder::new("s")
                .task(TaskConfigBuilder::new("t", "noop").max_attempts(0).build())
                .build(),
        )
        .build();
    assert!(matches!(validate_workflow("wf", &wf), Err(RiasError::ConfigError(_))));

    let agent = AgentConfigBuilder::new("a")
        .failure_threshold(0)
        .workflow("wf", chain(&[("A", &[])]))
        .build();
    assert!(matches!(validate_agent(&agent), Err(RiasError::ConfigError(_))));
}

#[test]
fn empty_workflow_and_empty_stage_are_rejected() {
    assert!(validate_workflow("wf", &WorkflowConfig::default()).is_err());

    let wf = WorkflowConfigBuilder::new()
        .stage(StageConfigBuilder::new("empty").build())
        .build();
    assert!(validate_workflow("wf", &wf).is_err());
}

#[test]
fn agent_without_workflows_is_rejected() {
    let agent = AgentConfigBuilder::new("idle").build();
    assert!(matches!(validate_agent(&agent), Err(RiasError::ConfigError(_))));
}

#[test]
fn validation_is_idempotent() {
    let good = chain(&[("A", &[]), ("B", &["A"])]);
    let bad = chain(&[("A", &["B"]), ("B", &["A"])]);

    for _ in 0..3 {
        assert!(validate_workflow("good", &good).is_ok());
        assert!(matches!(
            validate_workflow("bad", &bad),
            Err(RiasError::CycleDetected { .. })
        ));
    }
}

#[test]
fn config_file_fills_agent_names_from_keys() {
    let mut raw = ConfigFileBuilder::new()
        .agent(
            AgentConfigBuilder::new("ingest")
                .workflow("wf", chain(&[("A", &[])]))
                .build(),
        )
        .build_raw();
    if let Some(agent) = raw.agent.get_mut("ingest") {
        agent.name.clear();
    }

    let cfg = ConfigFile::try_from(raw).expect("config should validate");
    assert_eq!(cfg.agent["ingest"].name, "ingest");
}

#[test]
fn config_file_without_agents_is_rejected() {
    let raw = ConfigFileBuilder::new().build_raw();
    assert!(matches!(ConfigFile::try_from(raw), Err(RiasError::ConfigError(_))));
}
