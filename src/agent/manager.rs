// src/agent/manager.rs

//! Registry of agents and the single control surface for the embedding
//! application.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::agent::instance::Agent;
use crate::agent::snapshot::AgentSnapshot;
use crate::config::model::{AgentConfig, ConfigFile, DefaultSection};
use crate::errors::{Result, RiasError};
use crate::exec::operation::OperationRegistry;

/// Creates, controls and reports on agents.
///
/// Agents run independently of each other; the manager's map is the only
/// state they share. Construct one explicitly and share it by reference or
/// `Arc`.
#[derive(Debug)]
pub struct AgentManager {
    registry: OperationRegistry,
    defaults: DefaultSection,
    agents: RwLock<HashMap<String, Agent>>,
}

impl AgentManager {
    pub fn new(registry: OperationRegistry) -> Self {
        Self::with_defaults(registry, DefaultSection::default())
    }

    /// Manager whose agents fall back to `defaults` (usually the
    /// `[defaults]` section of a config file).
    pub fn with_defaults(registry: OperationRegistry, defaults: DefaultSection) -> Self {
        Self {
            registry,
            defaults,
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Validate `config`, resolve its operations and add the agent in the
    /// `Created` state. The agent id is its configured name.
    pub async fn register(&self, config: AgentConfig) -> Result<String> {
        let agent = Agent::new(&config, &self.defaults, &self.registry)?;
        let id = agent.id().to_string();

        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(RiasError::AlreadyRegistered(id));
        }
        agents.insert(id.clone(), agent);

        info!(agent = %id, "agent registered");
        Ok(id)
    }

    /// Register every agent of a validated config file, in name order.
    pub async fn register_all(&self, cfg: &ConfigFile) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(cfg.agent.len());
        for agent in cfg.agents() {
            ids.push(self.register(agent.clone()).await?);
        }
        Ok(ids)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.get(id).await?.start()
    }

    pub async fn pause(&self, id: &str) -> Result<()> {
        self.get(id).await?.pause()
    }

    pub async fn resume(&self, id: &str) -> Result<()> {
        self.get(id).await?.resume()
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.get(id).await?.stop()
    }

    pub async fn run_workflow(&self, id: &str, workflow: &str) -> Result<()> {
        self.get(id).await?.run_workflow(workflow)
    }

    /// Remove an agent, stopping it first if it is still live. Returns its
    /// final snapshot.
    pub async fn deregister(&self, id: &str) -> Result<AgentSnapshot> {
        let agent = self
            .agents
            .write()
            .await
            .remove(id)
            .ok_or_else(|| RiasError::NotFound(id.to_string()))?;

        if !agent.state().is_terminal() {
            agent.stop()?;
        }

        info!(agent = %id, "agent deregistered");
        Ok(agent.snapshot())
    }

    pub async fn status(&self, id: &str) -> Result<AgentSnapshot> {
        Ok(self.get(id).await?.snapshot())
    }

    pub async fn broadcast_status(&self) -> BTreeMap<String, AgentSnapshot> {
        self.agents
            .read()
            .await
            .iter()
            .map(|(id, agent)| (id.clone(), agent.snapshot()))
            .collect()
    }

    /// Wait until the agent has no workflow run in progress.
    pub async fn wait_idle(&self, id: &str) -> Result<()> {
        let agent = self.get(id).await?;
        agent.wait_idle().await;
        Ok(())
    }

    /// Wait until no registered agent has a run in progress.
    pub async fn wait_all_idle(&self) {
        let agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        join_all(agents.iter().map(|agent| agent.wait_idle())).await;
    }

    /// Ids of agents that are `Failed`, or that have runs in progress but
    /// no heartbeat within `max_silence`. Sorted.
    pub async fn unhealthy(&self, max_silence: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut ids: Vec<String> = self
            .agents
            .read()
            .await
            .iter()
            .filter(|(_, agent)| agent.is_unhealthy(max_silence, now))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        if !ids.is_empty() {
            warn!(agents = ?ids, ?max_silence, "unhealthy agents");
        }
        ids
    }

    /// Stop every live agent, wait for their runs to wind down and empty the
    /// registry.
    pub async fn shutdown(&self) {
        let agents: Vec<Agent> = self
            .agents
            .write()
            .await
            .drain()
            .map(|(_, agent)| agent)
            .collect();

        for agent in agents.iter() {
            if agent.state().is_terminal() {
                continue;
            }
            if let Err(e) = agent.stop() {
                debug!(agent = %agent.id(), error = %e, "stop during shutdown failed");
            }
        }

        join_all(agents.iter().map(|agent| agent.wait_idle())).await;
        info!(agents = agents.len(), "agent manager shut down");
    }

    /// Registered agent ids, sorted.
    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Handle to a registered agent.
    pub async fn get(&self, id: &str) -> Result<Agent> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RiasError::NotFound(id.to_string()))
    }
}
