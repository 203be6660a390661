// src/config/mod.rs

//! Configuration loading and validation for rias.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate structural invariants before anything runs (`validate.rs`):
//!   unique names, known dependencies, write-once output keys, acyclic
//!   stage graphs.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_from_str};
pub use model::{
    AgentConfig, ConfigFile, DefaultSection, RawConfigFile, StageConfig, TaskConfig,
    WorkflowConfig,
};
pub use validate::{validate_agent, validate_defaults, validate_workflow};
