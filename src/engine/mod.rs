// src/engine/mod.rs

//! Command queue orchestration engine.
//!
//! This module ties together:
//! - the run store (all runs and their commands)
//! - the single global command cursor (FIFO across runs)
//! - operator control operations (restart, stop, clear, skip)
//! - the run loop that dispatches one command at a time to a tool driver
//!
//! The pure state machine lives in [`core`] and [`control`]; [`handle`] is
//! the mutex-guarded service every caller shares, and [`runtime`] is the
//! async loop driving dispatch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigFile;
use crate::dispatch::ExecuteResult;
use crate::protocol::CommandSpec;
use crate::store::{CommandError, QueueId, RunId};

pub mod control;
pub mod core;
pub mod handle;
pub mod runtime;

pub use control::{ControlStep, SkipOutcome};
pub use core::{DispatchStep, FinishStep, QueueCore};
pub use handle::QueueHandle;
pub use runtime::QueueRuntime;

/// Aggregate condition of the executor (not of any single command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    Ready,
    Busy,
    Failed,
    Offline,
    Simulated,
    NotConfigured,
    Initializing,
    #[default]
    Unknown,
}

impl QueueState {
    /// Idle states from which a new dispatch may start.
    pub fn accepts_dispatch(self) -> bool {
        matches!(self, QueueState::Ready | QueueState::Simulated)
    }
}

/// Snapshot of the queue for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub state: QueueState,
    /// False after `stop` until the next `restart`.
    pub running: bool,
    /// Command currently being dispatched, if any.
    pub in_flight: Option<QueueId>,
}

/// Work ticket for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub queue_id: QueueId,
    pub run_id: RunId,
    pub command: CommandSpec,
}

/// What came back from one dispatch: a driver reply, or a failure that
/// prevented one (transport error, timeout).
pub type ExecuteOutcome = std::result::Result<ExecuteResult, CommandError>;

/// Events flowing into the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Something changed (new run, skip, restart); look for work now.
    Wake,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Timing options for the run loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// How often the loop looks for work when nothing wakes it.
    pub tick_interval: Duration,
    /// Upper bound for one tool dispatch.
    pub dispatch_timeout: Duration,
}

impl RuntimeOptions {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            tick_interval: Duration::from_millis(cfg.queue.tick_interval_ms),
            dispatch_timeout: Duration::from_secs(cfg.queue.dispatch_timeout_secs),
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            dispatch_timeout: Duration::from_secs(300),
        }
    }
}
