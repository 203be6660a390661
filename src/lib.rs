// src/lib.rs

pub mod agent;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod types;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::agent::AgentManager;
use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::ConfigFile;
use crate::dag::Scheduler;
use crate::exec::operation::OperationRegistry;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and validation
/// - the operation registry (built-ins only)
/// - the agent manager
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args
        .config
        .as_deref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let manager =
        AgentManager::with_defaults(OperationRegistry::with_builtins(), cfg.defaults.clone());
    let ids = manager.register_all(&cfg).await?;

    for id in ids.iter() {
        manager.start(id).await?;
    }
    info!(agents = ?ids, "all agents started");

    if args.once {
        manager.wait_all_idle().await;
        info!("all agents idle");
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("listening for Ctrl+C")?;
        info!("Ctrl+C received; shutting down");
    }

    let status = manager.broadcast_status().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&status).context("serializing agent status")?
    );

    let failed = status
        .values()
        .filter(|s| s.state == crate::types::AgentState::Failed)
        .count();
    if failed > 0 {
        warn!(failed_agents = failed, "some agents ended in the failed state");
    }

    manager.shutdown().await;
    Ok(())
}

/// Simple dry-run output: agents, workflows, stages with their
/// dependencies and tasks.
fn print_dry_run(cfg: &ConfigFile) {
    println!("rias dry-run");
    println!(
        "  defaults: max_attempts = {}, backoff = {:?} x{}, max_concurrent_stages = {}, failure_threshold = {}",
        cfg.defaults.max_attempts,
        cfg.defaults.backoff.get(),
        cfg.defaults.backoff_multiplier,
        cfg.defaults.max_concurrent_stages,
        cfg.defaults.failure_threshold,
    );
    println!();

    for agent in cfg.agents() {
        println!(
            "agent {} (failure_threshold = {})",
            agent.name,
            agent.effective_failure_threshold(&cfg.defaults)
        );

        for (name, wf) in agent.workflow.iter() {
            let budget = wf.effective_max_concurrent_stages(agent, &cfg.defaults);
            println!("  workflow {name} (max_concurrent_stages = {budget})");
            if !wf.inputs.is_empty() {
                println!("      inputs: {:?}", wf.inputs.keys().collect::<Vec<_>>());
            }

            let scheduler = Scheduler::from_config(wf, budget);
            for stage_name in scheduler.stage_names() {
                let Some(stage) = wf.stage.iter().find(|s| s.name == stage_name) else {
                    continue;
                };
                println!("    - stage {} [{:?}]", stage.name, stage.mode);
                let deps = scheduler.dependencies_of(stage_name);
                if !deps.is_empty() {
                    println!("        after: {deps:?}");
                }
                if stage.continue_on_failure {
                    println!("        continue_on_failure: true");
                }
                for task in stage.task.iter() {
                    println!(
                        "        task {} -> {} (attempts = {})",
                        task.name,
                        task.operation,
                        task.effective_max_attempts(&cfg.defaults)
                    );
                    if !task.inputs.is_empty() {
                        println!("            inputs: {:?}", task.inputs);
                    }
                    if !task.outputs.is_empty() {
                        println!("            outputs: {:?}", task.outputs);
                    }
                }
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
