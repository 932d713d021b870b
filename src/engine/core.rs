// src/engine/core.rs

//! Pure queue state machine.
//!
//! [`QueueCore`] owns the run store and the aggregate queue state. It is
//! synchronous and deterministic: callers pass in timestamps and dispatch
//! outcomes, and get back what happened plus the alerts to send. It has no
//! channels, no Tokio types, and performs no IO, so the whole state machine
//! can be unit tested without devices.

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::alerts::AlertEvent;
use crate::dispatch::{ExecuteResult, ResponseCode};
use crate::engine::{Dispatch, ExecuteOutcome, QueueState, QueueStatus};
use crate::errors::Result;
use crate::store::{
    CommandError, CommandStatus, FailureKind, NewRun, QueueId, Run, RunStatus, RunStore,
};
use crate::types::OrphanPolicy;

/// A dispatch the run loop should perform now.
#[derive(Debug, Clone)]
pub struct DispatchStep {
    pub dispatch: Dispatch,
    pub alerts: Vec<AlertEvent>,
}

/// Result of recording a dispatch outcome.
#[derive(Debug, Clone)]
pub struct FinishStep {
    /// New status of the command, or `None` if the outcome was discarded
    /// because the command is no longer in flight (e.g. after `clear_all`).
    pub status: Option<CommandStatus>,
    pub alerts: Vec<AlertEvent>,
}

#[derive(Debug)]
pub struct QueueCore {
    pub(crate) store: RunStore,
    pub(crate) state: QueueState,
    /// State to fall back to when nothing is in flight (`READY` or `SIMULATED`).
    pub(crate) idle_state: QueueState,
    pub(crate) running: bool,
    pub(crate) in_flight: Option<QueueId>,
}

impl QueueCore {
    /// A ready-to-run core over an existing store.
    pub fn new(store: RunStore, idle_state: QueueState) -> Self {
        Self {
            store,
            state: idle_state,
            idle_state,
            running: true,
            in_flight: None,
        }
    }

    /// An empty core that is still loading; it will not dispatch until
    /// [`QueueCore::restore`] is called.
    pub fn initializing(idle_state: QueueState) -> Self {
        Self {
            store: RunStore::new(),
            state: QueueState::Initializing,
            idle_state,
            running: true,
            in_flight: None,
        }
    }

    /// Install a loaded store, reconcile orphaned commands and leave the
    /// initializing state.
    ///
    /// With [`OrphanPolicy::Fail`] and at least one orphan, the queue starts
    /// `FAILED` so the operator has to acknowledge with `restart`.
    pub fn restore(
        &mut self,
        mut store: RunStore,
        policy: OrphanPolicy,
        has_protocols: bool,
        now: DateTime<Utc>,
    ) -> Vec<QueueId> {
        let orphans = store.reconcile_orphans(policy, now);
        self.store = store;
        self.in_flight = None;

        self.state = if !orphans.is_empty() && policy == OrphanPolicy::Fail {
            QueueState::Failed
        } else if !has_protocols && self.store.is_empty() {
            QueueState::NotConfigured
        } else {
            self.idle_state
        };

        info!(
            runs = self.store.len(),
            orphans = orphans.len(),
            state = ?self.state,
            "queue restored"
        );
        orphans
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn in_flight(&self) -> Option<QueueId> {
        self.in_flight
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            state: self.state,
            running: self.running,
            in_flight: self.in_flight,
        }
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn create_run(&mut self, new: NewRun, now: DateTime<Utc>) -> Result<Run> {
        self.store.insert_run(new, now)
    }

    /// Start the next eligible command, if the queue may dispatch.
    ///
    /// Nothing happens while stopped, while a command is in flight, or while
    /// the aggregate state is anything other than idle (notably `FAILED`).
    pub fn begin_next(&mut self, now: DateTime<Utc>) -> Option<DispatchStep> {
        if !self.running || self.in_flight.is_some() || !self.state.accepts_dispatch() {
            return None;
        }

        let queue_id = self.store.next_eligible()?;
        let run_id = self.store.command(queue_id)?.run_id;
        let first_of_run = !self.store.run_has_progress(run_id);

        let command = match self.store.transition(queue_id, CommandStatus::Started, now) {
            Ok(cmd) => cmd.command_info.clone(),
            Err(e) => {
                error!(queue_id = %queue_id, error = %e, "could not start eligible command");
                return None;
            }
        };

        self.in_flight = Some(queue_id);
        self.state = QueueState::Busy;

        info!(
            queue_id = %queue_id,
            run_id = %run_id,
            tool_id = %command.tool_id,
            command = %command.command,
            "dispatching command"
        );

        let mut alerts = Vec::new();
        if first_of_run {
            alerts.push(AlertEvent::RunStarted {
                run_id,
                protocol_id: self.protocol_of(run_id),
            });
        }

        Some(DispatchStep {
            dispatch: Dispatch {
                queue_id,
                run_id,
                command,
            },
            alerts,
        })
    }

    /// Record the outcome of the in-flight dispatch.
    ///
    /// A non-`OK` reply and a transport error are handled identically: the
    /// command fails and the queue halts in `FAILED` until an operator acts.
    pub fn finish(
        &mut self,
        queue_id: QueueId,
        outcome: ExecuteOutcome,
        now: DateTime<Utc>,
    ) -> FinishStep {
        if self.in_flight != Some(queue_id) {
            warn!(
                queue_id = %queue_id,
                "dispatch result for a command that is no longer in flight; discarding"
            );
            return FinishStep {
                status: None,
                alerts: Vec::new(),
            };
        }
        self.in_flight = None;

        match outcome {
            Ok(result) if result.is_ok() => self.complete(queue_id, result, now),
            Ok(result) => {
                let message = reply_message(&result);
                let mut err = CommandError::new(FailureKind::ResponseCode, message);
                err.metadata = result.metadata;
                self.fail(queue_id, err, now)
            }
            Err(err) => self.fail(queue_id, err, now),
        }
    }

    /// Stop dispatching for good; the process is going away.
    pub fn set_offline(&mut self) {
        self.running = false;
        self.in_flight = None;
        self.state = QueueState::Offline;
    }

    fn complete(&mut self, queue_id: QueueId, result: ExecuteResult, now: DateTime<Utc>) -> FinishStep {
        let run_id = match self.store.transition(queue_id, CommandStatus::Completed, now) {
            Ok(cmd) => {
                cmd.result_metadata = result.metadata;
                info!(
                    queue_id = %queue_id,
                    run_id = %cmd.run_id,
                    duration_actual = cmd.duration_actual,
                    "command completed"
                );
                cmd.run_id
            }
            Err(e) => {
                error!(queue_id = %queue_id, error = %e, "could not complete command");
                self.state = self.idle_state;
                return FinishStep {
                    status: None,
                    alerts: Vec::new(),
                };
            }
        };

        self.state = self.idle_state;

        let mut alerts = Vec::new();
        if self.store.run_status(run_id) == Some(RunStatus::Completed) {
            info!(run_id = %run_id, "run completed");
            alerts.push(AlertEvent::RunCompleted {
                run_id,
                protocol_id: self.protocol_of(run_id),
            });
        }

        FinishStep {
            status: Some(CommandStatus::Completed),
            alerts,
        }
    }

    fn fail(&mut self, queue_id: QueueId, err: CommandError, now: DateTime<Utc>) -> FinishStep {
        // Halt regardless of whether the bookkeeping below succeeds.
        self.state = QueueState::Failed;

        let cmd = match self.store.transition(queue_id, CommandStatus::Failed, now) {
            Ok(cmd) => cmd,
            Err(e) => {
                error!(queue_id = %queue_id, error = %e, "could not fail command");
                return FinishStep {
                    status: None,
                    alerts: Vec::new(),
                };
            }
        };

        warn!(
            queue_id = %queue_id,
            run_id = %cmd.run_id,
            tool_id = %cmd.command_info.tool_id,
            kind = ?err.kind,
            error = %err.message,
            "command failed; queue halted"
        );

        let alert = AlertEvent::CommandFailed {
            run_id: cmd.run_id,
            queue_id,
            tool_id: cmd.command_info.tool_id.clone(),
            command: cmd.command_info.command.clone(),
            message: err.message.clone(),
        };
        cmd.error = Some(err);

        FinishStep {
            status: Some(CommandStatus::Failed),
            alerts: vec![alert],
        }
    }

    fn protocol_of(&self, run_id: crate::store::RunId) -> String {
        self.store
            .protocol_of(run_id)
            .unwrap_or_default()
            .to_string()
    }
}

fn reply_message(result: &ExecuteResult) -> String {
    let detail = result
        .metadata
        .get("message")
        .or_else(|| result.metadata.get("error"))
        .and_then(|v| v.as_str());

    let code = match result.response_code {
        ResponseCode::Ok => "OK",
        ResponseCode::Error => "ERROR",
        ResponseCode::Unknown => "UNKNOWN",
    };

    match detail {
        Some(d) => format!("driver replied {code}: {d}"),
        None => format!("driver replied {code}"),
    }
}
