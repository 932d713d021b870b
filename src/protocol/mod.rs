// src/protocol/mod.rs

//! Protocol definitions: parameter validation and command expansion.
//!
//! - [`value`] holds the schema-less parameter value type.
//! - [`schema`] validates raw parameter payloads into [`ValidatedParams`].
//! - [`template`] expands config-declared step templates.
//! - [`registry`] is the static, startup-built map of protocol id to
//!   definition.
//!
//! Expansion is pure and deterministic; it never touches the network or any
//! device. Its failures ([`ExpansionError`]) are distinct from validation
//! failures ([`ValidationErrors`]).

pub mod registry;
pub mod schema;
pub mod template;
pub mod value;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ProtocolCategory;

pub use registry::ProtocolRegistry;
pub use schema::{
    Constraint, FieldError, ParamField, ParamKind, ParamSchema, ValidatedParams, ValidationErrors,
};
pub use template::{RepeatCount, StepTemplate, TemplateStep};
pub use value::{ParamMap, Value};

/// Upper bound on the commands a single run may expand to.
pub const MAX_RUN_COMMANDS: usize = 10_000;

/// Expansion logic hit an internal inconsistency.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ExpansionError(pub String);

/// Extra, driver-facing options carried alongside a command.
///
/// The engine does not interpret these; they are forwarded to the tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdvancedParameters {
    /// Variable the driver consults to decide whether to skip execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_execution_variable: Option<String>,

    #[serde(default)]
    pub run_async: bool,
}

/// One device command produced by expanding a protocol.
///
/// `label` is cosmetic and has no effect on execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tool_id: String,
    pub tool_type: String,
    pub command: String,
    #[serde(default)]
    pub params: ParamMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_parameters: Option<AdvancedParameters>,
}

impl CommandSpec {
    pub fn new(
        tool_id: impl Into<String>,
        tool_type: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            label: None,
            tool_id: tool_id.into(),
            tool_type: tool_type.into(),
            command: command.into(),
            params: ParamMap::new(),
            advanced_parameters: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Estimated duration in seconds, if the payload carries one.
    pub fn estimated_duration(&self) -> Option<f64> {
        self.params.get("estimated_duration").and_then(Value::as_f64)
    }
}

/// Native expansion function for protocols registered in code.
pub type ExpandFn = fn(&ValidatedParams) -> Result<Vec<CommandSpec>, ExpansionError>;

/// How a protocol turns parameters into commands.
#[derive(Debug, Clone)]
pub enum Expander {
    /// Steps declared in the config file.
    Template(Vec<TemplateStep>),
    /// Function registered in code.
    Native(ExpandFn),
}

/// A named, immutable protocol template.
#[derive(Debug, Clone)]
pub struct ProtocolDefinition {
    pub id: String,
    pub name: String,
    pub category: ProtocolCategory,
    pub workcell: String,
    pub description: Option<String>,
    pub schema: ParamSchema,
    pub expander: Expander,
}

impl ProtocolDefinition {
    pub fn validate(&self, raw: &ParamMap) -> Result<ValidatedParams, ValidationErrors> {
        self.schema.validate(raw)
    }

    /// Expand validated parameters into the ordered command list.
    ///
    /// An empty expansion is an error: a run always owns at least one command.
    /// So is one longer than [`MAX_RUN_COMMANDS`], or one whose payloads hold
    /// numbers JSON cannot represent.
    pub fn expand(&self, params: &ValidatedParams) -> Result<Vec<CommandSpec>, ExpansionError> {
        let commands = match self.expander {
            Expander::Template(ref steps) => template::expand_steps(steps, params)?,
            Expander::Native(f) => f(params)?,
        };

        if commands.is_empty() {
            return Err(ExpansionError("expansion produced no commands".to_string()));
        }
        if commands.len() > MAX_RUN_COMMANDS {
            return Err(ExpansionError(format!(
                "expansion produced {} commands, limit is {MAX_RUN_COMMANDS}",
                commands.len()
            )));
        }
        if let Some(cmd) = commands.iter().find(|c| !c.params.values().all(Value::is_finite)) {
            return Err(ExpansionError(format!(
                "command '{}' carries a non-finite number",
                cmd.command
            )));
        }
        Ok(commands)
    }

    pub fn summary(&self) -> ProtocolSummary {
        ProtocolSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category,
            workcell: self.workcell.clone(),
            description: self.description.clone(),
            params: self.schema.fields().to_vec(),
            steps: match self.expander {
                Expander::Template(ref steps) => Some(steps.len()),
                Expander::Native(_) => None,
            },
        }
    }
}

/// Read-only description of a protocol for listings and forms.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSummary {
    pub id: String,
    pub name: String,
    pub category: ProtocolCategory,
    pub workcell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub params: Vec<ParamField>,
    /// Number of template steps (`None` for natively registered protocols).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
}

/// Deterministic digest of an expanded command list.
///
/// Same protocol and parameters always give the same digest.
pub fn commands_digest(commands: &[CommandSpec]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(commands)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
