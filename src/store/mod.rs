// src/store/mod.rs

//! Run store: persisted runs and their commands.
//!
//! - [`model`] defines runs, commands and the derived run status rule.
//! - [`run_store`] owns the collections and the legal status transitions.
//! - [`journal`] persists snapshots (in memory or to a JSON file).

pub mod journal;
pub mod model;
pub mod run_store;

pub use journal::{FileJournal, MemoryJournal, RunJournal, journal_for};
pub use model::{
    CommandError, CommandStatus, FailureKind, Metadata, QueueId, Run, RunCommand, RunId,
    RunRecord, RunStatus, derive_run_status,
};
pub use run_store::{NewRun, RunStore, StoreSnapshot};
