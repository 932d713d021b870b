// crates/test-utils/src/fake_dispatcher.rs

//! Fake collaborators for queue tests: a dispatcher that replays a per-call
//! script and records what it was asked to run, plus alert channels that
//! record or reject every event.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use labqueue::alerts::{AlertChannel, AlertEvent};
use labqueue::dispatch::{ExecuteResult, ToolCommandInfo, ToolDispatcher};
use labqueue::errors::{LabqueueError, Result};

/// What the scripted dispatcher does on a given call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Reply `ERROR` with this message.
    Error(String),
    /// Fail at the transport level.
    Transport(String),
    /// Never reply within any reasonable timeout.
    Hang,
}

/// A fake dispatcher that:
/// - records every command it was asked to execute (in order)
/// - replies `OK` unless a call number (1-based) is scripted otherwise.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDispatcher {
    calls: Arc<Mutex<Vec<ToolCommandInfo>>>,
    script: Arc<Mutex<BTreeMap<usize, Script>>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the `n`th call (1-based).
    pub fn on_call(self, n: usize, script: Script) -> Self {
        self.script.lock().unwrap().insert(n, script);
        self
    }

    pub fn fail_on_call(self, n: usize) -> Self {
        self.on_call(n, Script::Error(format!("scripted failure on call {n}")))
    }

    pub fn calls(&self) -> Vec<ToolCommandInfo> {
        self.calls.lock().unwrap().clone()
    }

    /// Opcodes in dispatch order.
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }
}

impl ToolDispatcher for ScriptedDispatcher {
    fn execute<'a>(
        &'a self,
        command: &'a ToolCommandInfo,
    ) -> Pin<Box<dyn Future<Output = Result<ExecuteResult>> + Send + 'a>> {
        let n = {
            let mut guard = self.calls.lock().unwrap();
            guard.push(command.clone());
            guard.len()
        };
        let script = self.script.lock().unwrap().get(&n).cloned();

        Box::pin(async move {
            match script {
                None => Ok(ExecuteResult::ok()
                    .with_metadata("call", serde_json::Value::from(n as u64))),
                Some(Script::Error(msg)) => Ok(ExecuteResult::error(msg)),
                Some(Script::Transport(msg)) => Err(LabqueueError::DeviceExecution {
                    tool_id: command.tool_id.clone(),
                    message: msg,
                }),
                Some(Script::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ExecuteResult::ok())
                }
            }
        })
    }
}

/// Alert channel that remembers every event it was given.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlerts {
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AlertChannel for RecordingAlerts {
    fn notify<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        })
    }
}

/// Alert channel whose deliveries always fail.
#[derive(Debug, Clone, Default)]
pub struct FailingAlerts;

impl AlertChannel for FailingAlerts {
    fn notify<'a>(
        &'a self,
        _event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { Err(LabqueueError::AlertChannel("webhook unreachable".to_string())) })
    }
}
