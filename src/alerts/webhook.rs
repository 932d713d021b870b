// src/alerts/webhook.rs

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::errors::{LabqueueError, Result};

use super::{AlertChannel, AlertEvent};

/// Posts alerts to a Slack-compatible incoming webhook as `{"text": ...}`.
#[derive(Debug, Clone)]
pub struct WebhookAlerts {
    client: reqwest::Client,
    url: String,
    workcell: String,
    timeout: Duration,
}

impl WebhookAlerts {
    pub fn new(url: impl Into<String>, workcell: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            workcell: workcell.into(),
            timeout,
        }
    }
}

impl AlertChannel for WebhookAlerts {
    fn notify<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let text = event.message(&self.workcell);
            debug!(%text, "posting alert to webhook");

            let response = self
                .client
                .post(&self.url)
                .timeout(self.timeout)
                .json(&json!({ "text": text }))
                .send()
                .await
                .map_err(|e| LabqueueError::AlertChannel(e.to_string()))?;

            if !response.status().is_success() {
                return Err(LabqueueError::AlertChannel(format!(
                    "webhook returned HTTP {}",
                    response.status()
                )));
            }
            Ok(())
        })
    }
}
