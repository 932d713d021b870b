// src/engine/handle.rs

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertChannel, AlertEvent, spawn_alerts};
use crate::errors::{LabqueueError, Result};
use crate::protocol::{ParamMap, ProtocolRegistry, ProtocolSummary, commands_digest};
use crate::store::{
    CommandStatus, NewRun, QueueId, Run, RunCommand, RunId, RunJournal, RunStore,
};
use crate::types::OrphanPolicy;

use super::core::QueueCore;
use super::{Dispatch, ExecuteOutcome, QueueStatus, RuntimeEvent, SkipOutcome};

/// The single queue service instance.
///
/// Cheap to clone; every clone shares the same mutex-guarded core, so run
/// creation, operator control calls and the run loop all go through one
/// mutation path. Every mutation is persisted through the journal before the
/// lock is released.
#[derive(Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

struct Shared {
    core: Mutex<QueueCore>,
    registry: Arc<ProtocolRegistry>,
    journal: Arc<dyn RunJournal>,
    alerts: Arc<dyn AlertChannel>,
    events: mpsc::Sender<RuntimeEvent>,
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("protocols", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}

impl QueueHandle {
    pub fn new(
        core: QueueCore,
        registry: Arc<ProtocolRegistry>,
        journal: Box<dyn RunJournal>,
        alerts: Arc<dyn AlertChannel>,
        events: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                registry,
                journal: Arc::from(journal),
                alerts,
                events,
            }),
        }
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.shared.registry
    }

    /// Load the journal, reconcile orphaned commands and leave `INITIALIZING`.
    ///
    /// Returns the ids of reconciled orphans.
    pub async fn initialize(&self, policy: OrphanPolicy) -> Result<Vec<QueueId>> {
        let store = match self.shared.journal.load()? {
            Some(snapshot) => RunStore::from_snapshot(snapshot),
            None => RunStore::new(),
        };

        let orphans = {
            let mut core = self.lock().await;
            let orphans =
                core.restore(store, policy, !self.shared.registry.is_empty(), Utc::now());
            if !orphans.is_empty() {
                self.persist(&core).await;
            }
            orphans
        };

        self.wake();
        Ok(orphans)
    }

    /// Validate, expand and persist a new run.
    ///
    /// Validation and expansion happen outside the queue lock; they are pure.
    /// Nothing is stored when either fails.
    pub async fn create_run(
        &self,
        workcell: &str,
        protocol_id: &str,
        params: &ParamMap,
    ) -> Result<Run> {
        let def = self.shared.registry.lookup(workcell, protocol_id)?;
        let params = def
            .validate(params)
            .map_err(LabqueueError::ProtocolParamsInvalid)?;
        let commands =
            def.expand(&params)
                .map_err(|e| LabqueueError::ProtocolGenerationFailed {
                    protocol_id: protocol_id.to_string(),
                    reason: e.to_string(),
                })?;
        let digest = commands_digest(&commands)?;

        let run = {
            let mut core = self.lock().await;
            let run = core.create_run(
                NewRun {
                    protocol_id: def.id.clone(),
                    workcell: def.workcell.clone(),
                    params,
                    commands_digest: digest,
                    commands,
                },
                Utc::now(),
            )?;
            self.persist(&core).await;
            run
        };

        self.wake();
        Ok(run)
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Run> {
        self.lock()
            .await
            .store()
            .get(run_id)
            .ok_or_else(|| LabqueueError::RunNotFound(run_id.to_string()))
    }

    /// All runs, oldest first.
    pub async fn list_runs(&self) -> Vec<Run> {
        self.lock().await.store().all()
    }

    /// All commands in global FIFO order.
    pub async fn commands(&self) -> Vec<RunCommand> {
        self.lock().await.store().commands().cloned().collect()
    }

    pub async fn status(&self) -> QueueStatus {
        self.lock().await.status()
    }

    pub fn protocols(&self) -> Vec<ProtocolSummary> {
        self.shared.registry.iter().map(|def| def.summary()).collect()
    }

    pub async fn restart(&self) -> QueueStatus {
        let step = {
            let mut core = self.lock().await;
            let step = core.restart();
            self.persist(&core).await;
            step
        };
        self.notify(step.alerts);
        self.wake();
        step.status
    }

    pub async fn stop(&self) -> QueueStatus {
        let step = self.lock().await.stop();
        self.notify(step.alerts);
        step.status
    }

    pub async fn clear_all(&self) -> QueueStatus {
        let step = {
            let mut core = self.lock().await;
            let step = core.clear_all();
            self.persist(&core).await;
            step
        };
        self.wake();
        step.status
    }

    pub async fn clear_completed(&self) -> QueueStatus {
        let mut core = self.lock().await;
        let step = core.clear_completed();
        if step.removed > 0 {
            self.persist(&core).await;
        }
        step.status
    }

    pub async fn skip_command(&self, queue_id: QueueId) -> Result<SkipOutcome> {
        let outcome = {
            let mut core = self.lock().await;
            let outcome = core.skip_command(queue_id, Utc::now())?;
            self.persist(&core).await;
            outcome
        };
        self.notify(outcome.alerts.clone());
        self.wake();
        Ok(outcome)
    }

    pub async fn skip_commands_until(&self, queue_id: QueueId) -> Result<SkipOutcome> {
        let outcome = {
            let mut core = self.lock().await;
            let outcome = core.skip_commands_until(queue_id, Utc::now())?;
            self.persist(&core).await;
            outcome
        };
        self.notify(outcome.alerts.clone());
        self.wake();
        Ok(outcome)
    }

    /// Start the next eligible command, if any. Used by the run loop.
    pub async fn begin_next(&self) -> Option<Dispatch> {
        let step = {
            let mut core = self.lock().await;
            let step = core.begin_next(Utc::now())?;
            // STARTED is on disk before the device is touched.
            self.persist(&core).await;
            step
        };
        self.notify(step.alerts);
        Some(step.dispatch)
    }

    /// Record a dispatch outcome. Used by the run loop.
    pub async fn finish(&self, queue_id: QueueId, outcome: ExecuteOutcome) -> Option<CommandStatus> {
        let step = {
            let mut core = self.lock().await;
            let step = core.finish(queue_id, outcome, Utc::now());
            if step.status.is_some() {
                self.persist(&core).await;
            }
            step
        };
        self.notify(step.alerts);
        step.status
    }

    /// Mark the queue `OFFLINE`. In-flight commands stay `STARTED` for the
    /// next process to reconcile.
    pub async fn set_offline(&self) {
        let mut core = self.lock().await;
        if let Some(queue_id) = core.in_flight() {
            warn!(queue_id = %queue_id, "going offline with a command in flight");
        }
        core.set_offline();
        info!("queue offline");
    }

    /// Ask the run loop to shut down.
    pub async fn request_shutdown(&self) {
        if self
            .shared
            .events
            .send(RuntimeEvent::ShutdownRequested)
            .await
            .is_err()
        {
            debug!("run loop already gone; shutdown request dropped");
        }
    }

    async fn lock(&self) -> MutexGuard<'_, QueueCore> {
        self.shared.core.lock().await
    }

    /// Persist the current store. Failures are logged, not propagated: the
    /// in-memory state stays authoritative for this process.
    ///
    /// The save runs on the blocking pool while the caller still holds the
    /// queue lock, so snapshots reach the journal in mutation order.
    async fn persist(&self, core: &QueueCore) {
        let snapshot = core.store().snapshot();
        let journal = Arc::clone(&self.shared.journal);

        match tokio::task::spawn_blocking(move || journal.save(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "failed to persist run store"),
            Err(e) => error!(error = %e, "run store save task failed"),
        }
    }

    fn notify(&self, alerts: Vec<AlertEvent>) {
        if !alerts.is_empty() {
            spawn_alerts(&self.shared.alerts, alerts);
        }
    }

    /// Nudge the run loop. A full channel already holds a pending wake-up.
    fn wake(&self) {
        let _ = self.shared.events.try_send(RuntimeEvent::Wake);
    }
}
