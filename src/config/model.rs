// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::protocol::{ParamField, StepTemplate};
use crate::types::{OrphanPolicy, ProtocolCategory, StorageMode};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [workcell]
/// name = "cell-a"
///
/// [queue]
/// dispatch_timeout_secs = 120
/// storage = "file"
///
/// [tool.pf400]
/// type = "pf400"
/// url = "http://10.0.0.5:9100"
///
/// [protocol.plate_transfer]
/// name = "Plate transfer"
/// category = "production"
///
/// [[protocol.plate_transfer.step]]
/// tool = "pf400"
/// command = "transfer"
/// params = { source = "hotel_1" }
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub workcell: WorkcellSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub alerts: AlertsSection,

    /// Tool drivers from `[tool.<id>]`, keyed by tool id.
    #[serde(default)]
    pub tool: BTreeMap<String, ToolConfig>,

    /// Protocol definitions from `[protocol.<id>]`, keyed by protocol id.
    #[serde(default)]
    pub protocol: BTreeMap<String, ProtocolConfig>,
}

/// Validated configuration. Only constructed through `TryFrom<RawConfigFile>`
/// (or [`ConfigFile::new_unchecked`] from that impl).
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub workcell: WorkcellSection,
    pub server: ServerSection,
    pub queue: QueueSection,
    pub alerts: AlertsSection,
    pub tool: BTreeMap<String, ToolConfig>,
    pub protocol: BTreeMap<String, ProtocolConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            workcell: raw.workcell,
            server: raw.server,
            queue: raw.queue,
            alerts: raw.alerts,
            tool: raw.tool,
            protocol: raw.protocol,
        }
    }
}

/// `[workcell]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkcellSection {
    #[serde(default = "default_workcell_name")]
    pub name: String,
}

fn default_workcell_name() -> String {
    "default".to_string()
}

impl Default for WorkcellSection {
    fn default() -> Self {
        Self {
            name: default_workcell_name(),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8700".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// `[queue]` section: run loop and run store behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// How often the run loop looks for work when nothing wakes it.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Upper bound for a single tool dispatch; expiry fails the command.
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,

    #[serde(default)]
    pub storage: StorageMode,

    /// Directory for `runs.json` when `storage = "file"`.
    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default)]
    pub orphaned_commands: OrphanPolicy,

    /// Use the simulated dispatcher instead of talking to tool drivers.
    #[serde(default)]
    pub simulate: bool,
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_dispatch_timeout_secs() -> u64 {
    300
}

fn default_state_dir() -> String {
    ".labqueue".to_string()
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            storage: StorageMode::default(),
            state_dir: default_state_dir(),
            orphaned_commands: OrphanPolicy::default(),
            simulate: false,
        }
    }
}

/// `[alerts]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertsSection {
    /// Slack-compatible incoming webhook. Alerts are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_alert_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_alert_timeout_secs() -> u64 {
    5
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_alert_timeout_secs(),
        }
    }
}

/// `[tool.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(rename = "type")]
    pub tool_type: String,

    /// Base URL of the tool driver. Required unless the queue is simulated.
    #[serde(default)]
    pub url: Option<String>,
}

/// `[protocol.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Display name; defaults to the protocol id.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub category: ProtocolCategory,

    /// Owning workcell; defaults to `[workcell].name`.
    #[serde(default)]
    pub workcell: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// `[[protocol.<id>.param]]` entries.
    #[serde(default)]
    pub param: Vec<ParamField>,

    /// `[[protocol.<id>.step]]` entries, in execution order.
    #[serde(default)]
    pub step: Vec<StepTemplate>,
}
