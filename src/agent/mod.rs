// src/agent/mod.rs

//! Agents and the agent manager.
//!
//! - [`manager`] is the registry and control surface (`register`, `start`,
//!   `pause`, `stop`, `deregister`, `status`, `broadcast_status`).
//! - [`instance`] is a single agent: lifecycle, workflow runs, health.
//! - [`lifecycle`] is the pure state transition table.
//! - [`health`] tracks heartbeats and consecutive failures.
//! - [`snapshot`] holds the serializable status views.

pub mod health;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod snapshot;

pub use health::HealthRecord;
pub use instance::Agent;
pub use lifecycle::{next_state, LifecycleCommand};
pub use manager::AgentManager;
pub use snapshot::{AgentSnapshot, StageDigest, TaskDigest, WorkflowDigest};
