// src/dispatch/http.rs

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::{debug, info};

use crate::config::ConfigFile;
use crate::errors::{LabqueueError, Result};

use super::{ExecuteResult, ToolCommandInfo, ToolDispatcher};

/// Sends commands to tool drivers as JSON over HTTP.
///
/// Each tool is reached at `POST <url>/execute` with the [`ToolCommandInfo`]
/// as body; the driver answers with an [`ExecuteResult`].
#[derive(Debug, Clone)]
pub struct HttpToolDispatcher {
    client: reqwest::Client,
    /// Tool id -> base URL.
    endpoints: BTreeMap<String, String>,
}

impl HttpToolDispatcher {
    pub fn new(endpoints: BTreeMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Build from the `[tool.<id>]` table of a validated config.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let endpoints: BTreeMap<String, String> = cfg
            .tool
            .iter()
            .filter_map(|(id, tool)| tool.url.clone().map(|url| (id.clone(), url)))
            .collect();
        info!(tools = endpoints.len(), "http tool dispatcher configured");
        Self::new(endpoints)
    }

    fn endpoint(&self, tool_id: &str) -> Result<String> {
        let base = self
            .endpoints
            .get(tool_id)
            .ok_or_else(|| device_error(tool_id, "no driver endpoint configured for tool"))?;
        Ok(format!("{}/execute", base.trim_end_matches('/')))
    }
}

fn device_error(tool_id: &str, message: impl Into<String>) -> LabqueueError {
    LabqueueError::DeviceExecution {
        tool_id: tool_id.to_string(),
        message: message.into(),
    }
}

impl ToolDispatcher for HttpToolDispatcher {
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.endpoint(&command.tool_id)?;
            debug!(
                tool_id = %command.tool_id,
                command = %command.command,
                %url,
                "sending command to tool driver"
            );

            let response = self
                .client
                .post(&url)
                .json(command)
                .send()
                .await
                .map_err(|e| device_error(&command.tool_id, format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(device_error(
                    &command.tool_id,
                    format!("driver returned HTTP {status}"),
                ));
            }

            response
                .json::<ExecuteResult>()
                .await
                .map_err(|e| device_error(&command.tool_id, format!("undecodable reply: {e}")))
        })
    }
}
