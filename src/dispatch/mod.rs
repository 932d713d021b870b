// src/dispatch/mod.rs

//! Tool dispatch: the engine's only device I/O boundary.
//!
//! The run loop talks to a [`ToolDispatcher`] instead of any concrete driver
//! transport. This makes it easy to swap in a scripted dispatcher in tests.
//!
//! - [`HttpToolDispatcher`] posts commands to tool drivers over HTTP.
//! - [`SimulatedDispatcher`] acknowledges every command without hardware.
//!
//! Timeouts are enforced by the run loop, not by implementations.

pub mod http;
pub mod simulated;

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::protocol::CommandSpec;
use crate::store::Metadata;

pub use http::HttpToolDispatcher;
pub use simulated::SimulatedDispatcher;

/// Command as sent to a tool driver.
pub type ToolCommandInfo = CommandSpec;

/// Driver verdict for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    Ok,
    Error,
    Unknown,
}

/// Structured reply from a tool driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub response_code: ResponseCode,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ExecuteResult {
    pub fn ok() -> Self {
        Self {
            response_code: ResponseCode::Ok,
            metadata: Metadata::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            "message".to_string(),
            serde_json::Value::String(message.into()),
        );
        Self {
            response_code: ResponseCode::Error,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.response_code == ResponseCode::Ok
    }
}

/// Trait abstracting how a single command reaches its tool driver.
///
/// Production code uses [`HttpToolDispatcher`]; tests provide their own
/// implementation that doesn't need real devices.
pub trait ToolDispatcher: Send + Sync {
    /// Execute one command and return the driver's reply.
    ///
    /// Transport problems are returned as errors; a reachable driver that
    /// refuses the command replies with a non-`OK` response code. The queue
    /// treats both the same way.
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>>;
}

impl<T: ToolDispatcher + ?Sized> ToolDispatcher for Box<T> {
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>> {
        (**self).execute(command)
    }
}

impl<T: ToolDispatcher + ?Sized> ToolDispatcher for std::sync::Arc<T> {
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>> {
        (**self).execute(command)
    }
}
