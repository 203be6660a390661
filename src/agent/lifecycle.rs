// src/agent/lifecycle.rs

//! Agent lifecycle state machine.
//!
//! ```text
//! Created ──start──▶ Running ◀──resume/start── Paused
//!                      │  └────────pause───────▶  │
//!                      ├──stop──▶ Stopped ◀──stop─┘
//!                      └──fail──▶ Failed
//! ```
//!
//! `Stopped` and `Failed` are terminal. Pure; the agent applies the result.

use crate::errors::{Result, RiasError};
use crate::types::AgentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    Start,
    Pause,
    Resume,
    Stop,
    /// Internal: unrecoverable failure (failure threshold reached).
    Fail,
}

impl LifecycleCommand {
    pub fn verb(self) -> &'static str {
        match self {
            LifecycleCommand::Start => "start",
            LifecycleCommand::Pause => "pause",
            LifecycleCommand::Resume => "resume",
            LifecycleCommand::Stop => "stop",
            LifecycleCommand::Fail => "fail",
        }
    }
}

/// State after applying `cmd` to `state`.
///
/// `Ok(None)` means the command is accepted but changes nothing (pausing
/// a paused agent, resuming a running one). Anything not allowed from
/// `state` is `InvalidState`.
pub fn next_state(
    agent: &str,
    state: AgentState,
    cmd: LifecycleCommand,
) -> Result<Option<AgentState>> {
    use AgentState::*;
    use LifecycleCommand as C;

    let next = match (state, cmd) {
        (Created, C::Start) | (Paused, C::Start) | (Paused, C::Resume) => Some(Running),
        (Running, C::Resume) | (Paused, C::Pause) => None,
        (Running, C::Pause) => Some(Paused),
        (Created | Running | Paused, C::Stop) => Some(Stopped),
        (Created | Running | Paused, C::Fail) => Some(Failed),
        _ => {
            return Err(RiasError::InvalidState {
                agent: agent.to_string(),
                state,
                operation: cmd.verb(),
            });
        }
    };

    Ok(next)
}

