// src/dispatch/simulated.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tracing::info;

use crate::errors::Result;

use super::{ExecuteResult, ToolCommandInfo, ToolDispatcher};

/// Acknowledges every command with `OK` after an optional delay.
///
/// Used when the workcell runs in simulation mode.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDispatcher {
    delay: Duration,
}

impl SimulatedDispatcher {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ToolDispatcher for SimulatedDispatcher {
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            info!(
                tool_id = %command.tool_id,
                command = %command.command,
                "simulated command execution"
            );
            Ok(ExecuteResult::ok().with_metadata("simulated", serde_json::Value::Bool(true)))
        })
    }
}
