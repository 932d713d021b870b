// src/engine/control.rs

//! Operator control operations on the queue core.
//!
//! These mutate the same state as the run loop, but never go through the
//! dispatcher. Callers serialize them with the run loop by holding the
//! queue mutex (see [`crate::engine::QueueHandle`]).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::alerts::AlertEvent;
use crate::engine::{QueueCore, QueueState, QueueStatus};
use crate::errors::{LabqueueError, Result};
use crate::store::{CommandStatus, QueueId, RunId, RunStatus};

/// What a control operation did.
#[derive(Debug, Clone)]
pub struct ControlStep {
    pub status: QueueStatus,
    pub alerts: Vec<AlertEvent>,
    /// Number of runs removed (clear operations only).
    pub removed: usize,
}

/// Result of a skip operation.
#[derive(Debug, Clone, Serialize)]
pub struct SkipOutcome {
    /// Commands moved to `SKIPPED`, in FIFO order.
    pub skipped: Vec<QueueId>,
    pub status: QueueStatus,
    #[serde(skip)]
    pub alerts: Vec<AlertEvent>,
}

impl QueueCore {
    /// Clear the aggregate `FAILED` condition and let the loop dispatch again.
    ///
    /// Failed commands stay `FAILED`; the run they belong to stays blocked.
    pub fn restart(&mut self) -> ControlStep {
        self.running = true;
        if self.state == QueueState::Failed {
            self.state = self.idle_state;
        }
        info!(state = ?self.state, "queue restarted");

        ControlStep {
            status: self.status(),
            alerts: vec![AlertEvent::QueueRestarted],
            removed: 0,
        }
    }

    /// Pause after the current dispatch (if any) finishes.
    pub fn stop(&mut self) -> ControlStep {
        self.running = false;
        info!(in_flight = ?self.in_flight, "queue stopped");

        ControlStep {
            status: self.status(),
            alerts: vec![AlertEvent::QueueStopped],
            removed: 0,
        }
    }

    /// Remove every run and command and reset to idle.
    ///
    /// An in-flight dispatch is forgotten; its late result is discarded by
    /// [`QueueCore::finish`].
    pub fn clear_all(&mut self) -> ControlStep {
        let removed = self.store.clear();
        if let Some(queue_id) = self.in_flight.take() {
            warn!(queue_id = %queue_id, "clearing queue with a command in flight");
        }
        self.state = self.idle_state;
        warn!(runs = removed, "queue cleared");

        ControlStep {
            status: self.status(),
            alerts: Vec::new(),
            removed,
        }
    }

    /// Remove runs whose derived status is `COMPLETED`.
    pub fn clear_completed(&mut self) -> ControlStep {
        let completed = self.store.completed_run_ids();
        let removed = self.store.remove_runs(&completed);
        info!(runs = removed, "completed runs cleared");

        ControlStep {
            status: self.status(),
            alerts: Vec::new(),
            removed,
        }
    }

    /// Move one `CREATED` command to `SKIPPED`.
    pub fn skip_command(&mut self, queue_id: QueueId, now: DateTime<Utc>) -> Result<SkipOutcome> {
        self.ensure_skippable(queue_id)?;
        let run_id = self.store.transition(queue_id, CommandStatus::Skipped, now)?.run_id;
        info!(queue_id = %queue_id, run_id = %run_id, "command skipped");

        let alerts = self.completed_by_skip([run_id].into_iter().collect());
        Ok(SkipOutcome {
            skipped: vec![queue_id],
            status: self.status(),
            alerts,
        })
    }

    /// Skip every `CREATED` command strictly before `target` in FIFO order,
    /// leaving `target` as the next one to run.
    pub fn skip_commands_until(
        &mut self,
        target: QueueId,
        now: DateTime<Utc>,
    ) -> Result<SkipOutcome> {
        self.ensure_skippable(target)?;

        let ahead: Vec<QueueId> = self
            .store
            .commands()
            .take_while(|c| c.queue_id != target)
            .filter(|c| c.status == CommandStatus::Created)
            .map(|c| c.queue_id)
            .collect();

        let mut runs = BTreeSet::new();
        for queue_id in &ahead {
            let cmd = self.store.transition(*queue_id, CommandStatus::Skipped, now)?;
            runs.insert(cmd.run_id);
        }
        info!(target = %target, skipped = ahead.len(), "skipped commands up to target");

        let alerts = self.completed_by_skip(runs);
        Ok(SkipOutcome {
            skipped: ahead,
            status: self.status(),
            alerts,
        })
    }

    fn ensure_skippable(&self, queue_id: QueueId) -> Result<()> {
        let cmd = self
            .store
            .command(queue_id)
            .ok_or_else(|| LabqueueError::CommandNotFound(queue_id.to_string()))?;

        if cmd.status != CommandStatus::Created {
            return Err(LabqueueError::CommandNotSkippable {
                queue_id: queue_id.to_string(),
                status: cmd.status,
            });
        }
        Ok(())
    }

    /// Runs that a skip just finished off.
    fn completed_by_skip(&self, runs: BTreeSet<RunId>) -> Vec<AlertEvent> {
        runs.into_iter()
            .filter(|run_id| self.store.run_status(*run_id) == Some(RunStatus::Completed))
            .map(|run_id| AlertEvent::RunCompleted {
                run_id,
                protocol_id: self.store.protocol_of(run_id).unwrap_or_default().to_string(),
            })
            .collect()
    }
}
