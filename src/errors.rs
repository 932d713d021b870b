// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::protocol::ValidationErrors;
use crate::store::CommandStatus;

#[derive(Error, Debug)]
pub enum LabqueueError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Protocol not found: {0}")]
    ProtocolNotFound(String),

    #[error("Invalid protocol parameters: {0}")]
    ProtocolParamsInvalid(ValidationErrors),

    #[error("Protocol '{protocol_id}' failed to generate commands: {reason}")]
    ProtocolGenerationFailed { protocol_id: String, reason: String },

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command {queue_id} is {status} and cannot be skipped")]
    CommandNotSkippable {
        queue_id: String,
        status: CommandStatus,
    },

    #[error("Illegal status transition for command {queue_id}: {from} -> {to}")]
    InvalidTransition {
        queue_id: String,
        from: CommandStatus,
        to: CommandStatus,
    },

    #[error("Device execution failed on tool '{tool_id}': {message}")]
    DeviceExecution { tool_id: String, message: String },

    #[error("Alert delivery failed: {0}")]
    AlertChannel(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LabqueueError>;
