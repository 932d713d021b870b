// src/store/model.rs

//! Run and RunCommand entities and their status rules.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::protocol::{CommandSpec, ValidatedParams};

/// Time-sortable run identifier.
pub type RunId = Ulid;

/// Time-sortable command identifier; its ordering is the global FIFO order.
pub type QueueId = Ulid;

/// Opaque metadata map returned by tool drivers.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Lifecycle of a single RunCommand.
///
/// Legal edges: `Created -> Started -> {Completed | Failed}` and
/// `Created -> Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Created,
    Started,
    Failed,
    Completed,
    Skipped,
}

impl CommandStatus {
    pub fn can_transition_to(self, next: CommandStatus) -> bool {
        matches!(
            (self, next),
            (CommandStatus::Created, CommandStatus::Started)
                | (CommandStatus::Created, CommandStatus::Skipped)
                | (CommandStatus::Started, CommandStatus::Completed)
                | (CommandStatus::Started, CommandStatus::Failed)
        )
    }

    /// `Completed`, `Failed` or `Skipped`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Skipped
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Created => "CREATED",
            CommandStatus::Started => "STARTED",
            CommandStatus::Failed => "FAILED",
            CommandStatus::Completed => "COMPLETED",
            CommandStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Status of a run, always derived from its commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Created,
    Queued,
    Started,
    Completed,
    Failed,
}

/// Derive a run's status from its commands' statuses (in run order).
///
/// Precedence: FAILED > STARTED > COMPLETED > QUEUED > CREATED.
/// - FAILED if any command failed.
/// - STARTED if any command is in flight.
/// - COMPLETED if the last command completed, or the last command was skipped
///   and nothing is still waiting.
/// - QUEUED if every command is still `CREATED`.
/// - CREATED otherwise (including a run with no commands).
pub fn derive_run_status(statuses: &[CommandStatus]) -> RunStatus {
    let Some(&last) = statuses.last() else {
        return RunStatus::Created;
    };

    if statuses.contains(&CommandStatus::Failed) {
        return RunStatus::Failed;
    }
    if statuses.contains(&CommandStatus::Started) {
        return RunStatus::Started;
    }

    let waiting = statuses.contains(&CommandStatus::Created);
    match last {
        CommandStatus::Completed => return RunStatus::Completed,
        CommandStatus::Skipped if !waiting => return RunStatus::Completed,
        _ => {}
    }

    if statuses.iter().all(|s| *s == CommandStatus::Created) {
        RunStatus::Queued
    } else {
        RunStatus::Created
    }
}

/// Why a command failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Driver replied with a non-OK response code.
    ResponseCode,
    /// Driver could not be reached or its reply could not be read.
    Transport,
    /// Dispatch exceeded the configured timeout.
    Timeout,
    /// Command was in flight when the process went away.
    Orphaned,
}

/// Failure payload recorded on a RunCommand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandError {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl CommandError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }
}

/// One device command inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCommand {
    pub queue_id: QueueId,
    pub run_id: RunId,
    pub command_info: CommandSpec,
    pub status: CommandStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub skipped_at: Option<DateTime<Utc>>,
    /// Seconds.
    #[serde(default)]
    pub estimated_duration: Option<f64>,
    /// Seconds between start and completion.
    #[serde(default)]
    pub duration_actual: Option<f64>,
    #[serde(default)]
    pub error: Option<CommandError>,
    /// Metadata from the driver's successful reply.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub result_metadata: Metadata,
}

/// Persisted run header; commands are stored separately in FIFO order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub protocol_id: String,
    pub workcell: String,
    pub params: ValidatedParams,
    pub commands_digest: String,
    pub created_at: DateTime<Utc>,
    /// Command ids in run order.
    pub command_ids: Vec<QueueId>,
}

/// Consistent read-only view of a run and all of its commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Run {
    pub id: RunId,
    pub protocol_id: String,
    pub workcell: String,
    pub params: ValidatedParams,
    pub status: RunStatus,
    pub commands_digest: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub commands: Vec<RunCommand>,
}

impl Run {
    pub(crate) fn assemble(record: &RunRecord, commands: Vec<RunCommand>) -> Self {
        let statuses: Vec<CommandStatus> = commands.iter().map(|c| c.status).collect();
        let status = derive_run_status(&statuses);

        let started_at = commands.iter().filter_map(|c| c.started_at).min();
        let failed_at = commands.iter().filter_map(|c| c.failed_at).min();
        let skipped_at = commands.iter().filter_map(|c| c.skipped_at).max();
        let completed_at = if status == RunStatus::Completed {
            commands
                .iter()
                .filter_map(|c| c.completed_at.or(c.skipped_at))
                .max()
        } else {
            None
        };

        Self {
            id: record.id,
            protocol_id: record.protocol_id.clone(),
            workcell: record.workcell.clone(),
            params: record.params.clone(),
            status,
            commands_digest: record.commands_digest.clone(),
            created_at: record.created_at,
            started_at,
            completed_at,
            failed_at,
            skipped_at,
            commands,
        }
    }

    pub fn command_statuses(&self) -> Vec<CommandStatus> {
        self.commands.iter().map(|c| c.status).collect()
    }
}
