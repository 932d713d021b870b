// src/alerts/mod.rs

//! Best-effort operator notifications.
//!
//! Alerts are fire-and-forget: the queue hands events to
//! [`spawn_alerts`], which delivers them on background tasks and only logs
//! delivery failures. Nothing here can affect a command's status.

pub mod webhook;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::Result;
use crate::store::{QueueId, RunId};

pub use webhook::WebhookAlerts;

/// Something an operator may want to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    RunStarted {
        run_id: RunId,
        protocol_id: String,
    },
    RunCompleted {
        run_id: RunId,
        protocol_id: String,
    },
    CommandFailed {
        run_id: RunId,
        queue_id: QueueId,
        tool_id: String,
        command: String,
        message: String,
    },
    QueueRestarted,
    QueueStopped,
}

impl AlertEvent {
    /// Human-readable one-line message.
    pub fn message(&self, workcell: &str) -> String {
        match self {
            AlertEvent::RunStarted {
                run_id,
                protocol_id,
            } => format!("[{workcell}] run {run_id} ({protocol_id}) started"),
            AlertEvent::RunCompleted {
                run_id,
                protocol_id,
            } => format!("[{workcell}] run {run_id} ({protocol_id}) completed"),
            AlertEvent::CommandFailed {
                run_id,
                queue_id,
                tool_id,
                command,
                message,
            } => format!(
                "[{workcell}] command {command} on {tool_id} failed (run {run_id}, queue id {queue_id}): {message}. Queue halted."
            ),
            AlertEvent::QueueRestarted => format!("[{workcell}] queue restarted"),
            AlertEvent::QueueStopped => format!("[{workcell}] queue stopped"),
        }
    }
}

/// Trait abstracting where alerts go.
pub trait AlertChannel: Send + Sync {
    fn notify<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Writes alerts to the log only.
#[derive(Debug, Clone)]
pub struct LogAlerts {
    workcell: String,
}

impl LogAlerts {
    pub fn new(workcell: impl Into<String>) -> Self {
        Self {
            workcell: workcell.into(),
        }
    }
}

impl AlertChannel for LogAlerts {
    fn notify<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(alert = %event.message(&self.workcell), "alert");
            Ok(())
        })
    }
}

/// Deliver events in the background; failures are logged and dropped.
pub fn spawn_alerts(channel: &Arc<dyn AlertChannel>, events: Vec<AlertEvent>) {
    for event in events {
        let channel = Arc::clone(channel);
        tokio::spawn(async move {
            if let Err(e) = channel.notify(&event).await {
                warn!(error = %e, ?event, "alert delivery failed");
            }
        });
    }
}
