// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::AgentState;

#[derive(Error, Debug)]
pub enum RiasError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in workflow '{workflow}': {message}")]
    CycleDetected { workflow: String, message: String },

    #[error(
        "Output key '{key}' in workflow '{workflow}' is written by both '{first}' and '{second}'"
    )]
    KeyCollision {
        workflow: String,
        key: String,
        first: String,
        second: String,
    },

    #[error("Duplicate {kind} name '{name}' in {parent}")]
    DuplicateName {
        kind: &'static str,
        name: String,
        parent: String,
    },

    #[error("Unknown operation '{operation}' for task '{task}'")]
    UnknownOperation { task: String, operation: String },

    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent '{agent}' cannot {operation} while {state}")]
    InvalidState {
        agent: String,
        state: AgentState,
        operation: &'static str,
    },

    #[error("Workflow '{workflow}' not found in agent '{agent}'")]
    WorkflowNotFound { agent: String, workflow: String },

    #[error("Workflow '{workflow}' of agent '{agent}' is already running")]
    WorkflowBusy { agent: String, workflow: String },

    #[error("Agent already registered: {0}")]
    AlreadyRegistered(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RiasError>;
