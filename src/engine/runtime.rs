// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::dispatch::{ToolCommandInfo, ToolDispatcher};
use crate::errors::Result;
use crate::store::{CommandError, CommandStatus, FailureKind};

use super::handle::QueueHandle;
use super::{ExecuteOutcome, RuntimeEvent, RuntimeOptions};

/// The single worker that drives dispatch.
///
/// This is the async IO shell around the queue core: it wakes up on a timer
/// or on a [`RuntimeEvent::Wake`], asks the handle for the next eligible
/// command, calls the [`ToolDispatcher`] with a bounded timeout and records
/// the outcome. At most one dispatch is ever outstanding.
pub struct QueueRuntime<D: ToolDispatcher> {
    handle: QueueHandle,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    dispatcher: D,
    options: RuntimeOptions,
}

impl<D: ToolDispatcher> fmt::Debug for QueueRuntime<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRuntime")
            .field("handle", &self.handle)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<D: ToolDispatcher> QueueRuntime<D> {
    pub fn new(
        handle: QueueHandle,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        dispatcher: D,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            handle,
            event_rx,
            dispatcher,
            options,
        }
    }

    /// Main loop. Returns after a shutdown request; the queue is `OFFLINE`
    /// by then.
    pub async fn run(mut self) -> Result<()> {
        info!(
            tick_ms = self.options.tick_interval.as_millis() as u64,
            timeout_secs = self.options.dispatch_timeout.as_secs(),
            "queue run loop started"
        );

        let mut ticker = tokio::time::interval(self.options.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                event = self.event_rx.recv() => match event {
                    Some(RuntimeEvent::Wake) => debug!("run loop woken"),
                    Some(RuntimeEvent::ShutdownRequested) => {
                        info!("shutdown requested");
                        break;
                    }
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
            }

            if !self.drain().await {
                break;
            }
        }

        self.handle.set_offline().await;
        info!("queue run loop exiting");
        Ok(())
    }

    /// Perform one dispatch cycle, if a command is eligible.
    ///
    /// Returns the command's new status, or `None` when nothing was
    /// dispatched (stopped, failed, or no work).
    pub async fn tick(&mut self) -> Option<CommandStatus> {
        let dispatch = self.handle.begin_next().await?;
        let outcome = dispatch_with_timeout(
            &self.dispatcher,
            &dispatch.command,
            self.options.dispatch_timeout,
        )
        .await;
        self.handle.finish(dispatch.queue_id, outcome).await
    }

    /// Dispatch until nothing is eligible. Returns false when a shutdown
    /// arrived mid-dispatch.
    async fn drain(&mut self) -> bool {
        while let Some(dispatch) = self.handle.begin_next().await {
            let call = dispatch_with_timeout(
                &self.dispatcher,
                &dispatch.command,
                self.options.dispatch_timeout,
            );
            tokio::pin!(call);

            let outcome = loop {
                tokio::select! {
                    outcome = &mut call => break Some(outcome),
                    event = self.event_rx.recv() => match event {
                        Some(RuntimeEvent::Wake) => continue,
                        Some(RuntimeEvent::ShutdownRequested) | None => break None,
                    },
                }
            };

            let Some(outcome) = outcome else {
                warn!(
                    queue_id = %dispatch.queue_id,
                    "shutdown requested with a command in flight; abandoning dispatch"
                );
                return false;
            };

            self.handle.finish(dispatch.queue_id, outcome).await;
        }
        true
    }
}

/// Call the dispatcher, turning transport errors and timeouts into command
/// failures.
pub async fn dispatch_with_timeout<D: ToolDispatcher>(
    dispatcher: &D,
    command: &ToolCommandInfo,
    limit: Duration,
) -> ExecuteOutcome {
    match tokio::time::timeout(limit, dispatcher.execute(command)).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(CommandError::new(FailureKind::Transport, e.to_string())),
        Err(_) => Err(CommandError::new(
            FailureKind::Timeout,
            format!("no reply from '{}' within {:?}", command.tool_id, limit),
        )),
    }
}
