// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where the run store keeps its data between process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Runs live in memory only (lost on restart).
    Memory,
    /// Runs are written to `<state_dir>/runs.json` after every change.
    File,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StorageMode::Memory),
            "file" => Ok(StorageMode::File),
            other => Err(format!(
                "invalid storage mode: {other} (expected \"memory\" or \"file\")"
            )),
        }
    }
}

/// What to do at startup with commands that were `STARTED` when the process
/// last went away.
///
/// - `Fail`: mark them `FAILED` (kind `orphaned`) and start the queue in the
///   `FAILED` state so an operator has to acknowledge with `restart`.
/// - `Requeue`: put them back to `CREATED` so they are dispatched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    Fail,
    Requeue,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        OrphanPolicy::Fail
    }
}

impl FromStr for OrphanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fail" => Ok(OrphanPolicy::Fail),
            "requeue" => Ok(OrphanPolicy::Requeue),
            other => Err(format!(
                "invalid orphaned_commands policy: {other} (expected \"fail\" or \"requeue\")"
            )),
        }
    }
}

/// Intended use of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolCategory {
    Development,
    Qc,
    Production,
}

impl Default for ProtocolCategory {
    fn default() -> Self {
        ProtocolCategory::Development
    }
}

impl fmt::Display for ProtocolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolCategory::Development => "development",
            ProtocolCategory::Qc => "qc",
            ProtocolCategory::Production => "production",
        };
        f.write_str(s)
    }
}
