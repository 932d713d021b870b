// src/store/run_store.rs

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::errors::{LabqueueError, Result};
use crate::protocol::{CommandSpec, ValidatedParams};
use crate::store::model::{
    CommandError, CommandStatus, FailureKind, QueueId, Run, RunCommand, RunId, RunRecord,
    RunStatus,
};
use crate::types::OrphanPolicy;

/// Everything needed to persist a new run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub protocol_id: String,
    pub workcell: String,
    pub params: ValidatedParams,
    pub commands_digest: String,
    pub commands: Vec<CommandSpec>,
}

/// Serializable copy of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub runs: Vec<RunRecord>,
    /// Commands in FIFO order.
    pub commands: Vec<RunCommand>,
}

/// Owns all runs and their commands.
///
/// The store performs no locking and no IO: it is owned by the queue core,
/// which serializes every mutation. Commands are keyed by their queue id, so
/// iteration order is the global FIFO order.
#[derive(Debug)]
pub struct RunStore {
    runs: BTreeMap<RunId, RunRecord>,
    commands: BTreeMap<QueueId, RunCommand>,
    last_id: Ulid,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: BTreeMap::new(),
            commands: BTreeMap::new(),
            last_id: Ulid::nil(),
        }
    }

    /// Rebuild a store from a snapshot (e.g. loaded from disk).
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let runs: BTreeMap<RunId, RunRecord> =
            snapshot.runs.into_iter().map(|r| (r.id, r)).collect();
        let commands: BTreeMap<QueueId, RunCommand> = snapshot
            .commands
            .into_iter()
            .filter(|c| runs.contains_key(&c.run_id))
            .map(|c| (c.queue_id, c))
            .collect();

        let last_id = runs
            .keys()
            .chain(commands.keys())
            .max()
            .copied()
            .unwrap_or_else(Ulid::nil);

        Self {
            runs,
            commands,
            last_id,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            runs: self.runs.values().cloned().collect(),
            commands: self.commands.values().cloned().collect(),
        }
    }

    /// Strictly increasing id, even within the same millisecond.
    fn next_id(&mut self) -> Result<Ulid> {
        let candidate = Ulid::new();
        let id = if candidate > self.last_id {
            candidate
        } else {
            self.last_id
                .increment()
                .ok_or_else(|| anyhow::anyhow!("identifier space exhausted"))?
        };
        self.last_id = id;
        Ok(id)
    }

    /// Persist a new run with all of its commands in `CREATED` state.
    ///
    /// Ids are allocated before anything is inserted, so a failure leaves the
    /// store untouched.
    pub fn insert_run(&mut self, new: NewRun, now: DateTime<Utc>) -> Result<Run> {
        let run_id = self.next_id()?;
        let mut commands = Vec::with_capacity(new.commands.len());

        for spec in new.commands {
            let queue_id = self.next_id()?;
            commands.push(RunCommand {
                queue_id,
                run_id,
                estimated_duration: spec.estimated_duration(),
                command_info: spec,
                status: CommandStatus::Created,
                created_at: now,
                started_at: None,
                completed_at: None,
                failed_at: None,
                skipped_at: None,
                duration_actual: None,
                error: None,
                result_metadata: Default::default(),
            });
        }

        let record = RunRecord {
            id: run_id,
            protocol_id: new.protocol_id,
            workcell: new.workcell,
            params: new.params,
            commands_digest: new.commands_digest,
            created_at: now,
            command_ids: commands.iter().map(|c| c.queue_id).collect(),
        };

        info!(
            run_id = %run_id,
            protocol = %record.protocol_id,
            commands = commands.len(),
            "run created"
        );

        let run = Run::assemble(&record, commands.clone());
        self.runs.insert(run_id, record);
        self.commands
            .extend(commands.into_iter().map(|c| (c.queue_id, c)));

        Ok(run)
    }

    pub fn get(&self, run_id: RunId) -> Option<Run> {
        let record = self.runs.get(&run_id)?;
        Some(Run::assemble(record, self.commands_of(record)))
    }

    /// All runs, oldest first.
    pub fn all(&self) -> Vec<Run> {
        self.runs
            .values()
            .map(|record| Run::assemble(record, self.commands_of(record)))
            .collect()
    }

    pub fn run_status(&self, run_id: RunId) -> Option<RunStatus> {
        self.get(run_id).map(|r| r.status)
    }

    pub fn protocol_of(&self, run_id: RunId) -> Option<&str> {
        self.runs.get(&run_id).map(|r| r.protocol_id.as_str())
    }

    fn commands_of(&self, record: &RunRecord) -> Vec<RunCommand> {
        record
            .command_ids
            .iter()
            .filter_map(|id| self.commands.get(id).cloned())
            .collect()
    }

    /// All commands in global FIFO order.
    pub fn commands(&self) -> impl Iterator<Item = &RunCommand> {
        self.commands.values()
    }

    pub fn command(&self, queue_id: QueueId) -> Option<&RunCommand> {
        self.commands.get(&queue_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// First `CREATED` command in FIFO order whose run is neither failed nor
    /// already executing another command.
    pub fn next_eligible(&self) -> Option<QueueId> {
        let blocked: HashSet<RunId> = self
            .commands
            .values()
            .filter(|c| matches!(c.status, CommandStatus::Failed | CommandStatus::Started))
            .map(|c| c.run_id)
            .collect();

        self.commands
            .values()
            .find(|c| c.status == CommandStatus::Created && !blocked.contains(&c.run_id))
            .map(|c| c.queue_id)
    }

    /// Whether any command of the run has left `CREATED`.
    pub fn run_has_progress(&self, run_id: RunId) -> bool {
        self.runs.get(&run_id).is_some_and(|record| {
            record
                .command_ids
                .iter()
                .filter_map(|id| self.commands.get(id))
                .any(|c| c.status != CommandStatus::Created)
        })
    }

    /// Move a command along one legal edge, stamping the matching timestamp.
    pub fn transition(
        &mut self,
        queue_id: QueueId,
        next: CommandStatus,
        at: DateTime<Utc>,
    ) -> Result<&mut RunCommand> {
        let cmd = self
            .commands
            .get_mut(&queue_id)
            .ok_or_else(|| LabqueueError::CommandNotFound(queue_id.to_string()))?;

        if !cmd.status.can_transition_to(next) {
            return Err(LabqueueError::InvalidTransition {
                queue_id: queue_id.to_string(),
                from: cmd.status,
                to: next,
            });
        }

        debug!(
            queue_id = %queue_id,
            run_id = %cmd.run_id,
            tool_id = %cmd.command_info.tool_id,
            command = %cmd.command_info.command,
            from = %cmd.status,
            to = %next,
            "command status transition"
        );

        cmd.status = next;
        match next {
            CommandStatus::Started => cmd.started_at = Some(at),
            CommandStatus::Completed => {
                cmd.completed_at = Some(at);
                cmd.duration_actual = cmd
                    .started_at
                    .map(|s| (at - s).num_milliseconds() as f64 / 1000.0);
            }
            CommandStatus::Failed => cmd.failed_at = Some(at),
            CommandStatus::Skipped => cmd.skipped_at = Some(at),
            CommandStatus::Created => {}
        }

        Ok(cmd)
    }

    /// Remove the given runs and their commands. Returns how many runs were
    /// removed.
    pub fn remove_runs(&mut self, run_ids: &[RunId]) -> usize {
        let mut removed = 0;
        for run_id in run_ids {
            if let Some(record) = self.runs.remove(run_id) {
                for id in &record.command_ids {
                    self.commands.remove(id);
                }
                removed += 1;
            }
        }
        removed
    }

    /// Ids of runs whose derived status is `COMPLETED`.
    pub fn completed_run_ids(&self) -> Vec<RunId> {
        self.all()
            .into_iter()
            .filter(|r| r.status == RunStatus::Completed)
            .map(|r| r.id)
            .collect()
    }

    /// Drop every run and command.
    pub fn clear(&mut self) -> usize {
        let removed = self.runs.len();
        self.runs.clear();
        self.commands.clear();
        removed
    }

    /// Resolve commands left `STARTED` by a previous process.
    ///
    /// Returns the ids of the commands that were touched.
    pub fn reconcile_orphans(&mut self, policy: OrphanPolicy, now: DateTime<Utc>) -> Vec<QueueId> {
        let orphans: Vec<QueueId> = self
            .commands
            .values()
            .filter(|c| c.status == CommandStatus::Started)
            .map(|c| c.queue_id)
            .collect();

        for queue_id in &orphans {
            let Some(cmd) = self.commands.get_mut(queue_id) else {
                continue;
            };
            match policy {
                OrphanPolicy::Fail => {
                    cmd.status = CommandStatus::Failed;
                    cmd.failed_at = Some(now);
                    cmd.error = Some(CommandError::new(
                        FailureKind::Orphaned,
                        "command was in flight when the engine stopped",
                    ));
                }
                OrphanPolicy::Requeue => {
                    // Startup-only recovery edge; the run loop never does this.
                    cmd.status = CommandStatus::Created;
                    cmd.started_at = None;
                }
            }
            warn!(
                queue_id = %queue_id,
                run_id = %cmd.run_id,
                ?policy,
                "reconciled orphaned in-flight command"
            );
        }

        orphans
    }
}
