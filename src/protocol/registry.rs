// src/protocol/registry.rs

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::model::{ConfigFile, ProtocolConfig};
use crate::errors::{LabqueueError, Result};
use crate::protocol::schema::ParamSchema;
use crate::protocol::template::TemplateStep;
use crate::protocol::{Expander, ProtocolDefinition};

/// Static registry of protocol definitions, keyed by protocol id.
///
/// Built once at startup (from the config file and/or native registrations)
/// and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    protocols: BTreeMap<String, ProtocolDefinition>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the `[protocol.<id>]` sections of a validated
    /// config, resolving each step's tool type from `[tool.<id>]`.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();

        for (id, pc) in cfg.protocol.iter() {
            let def = definition_from_config(cfg, id, pc)?;
            registry.register(def)?;
        }

        info!(
            protocols = registry.len(),
            workcell = %cfg.workcell.name,
            "protocol registry built from config"
        );
        Ok(registry)
    }

    /// Add a definition. Ids are unique.
    pub fn register(&mut self, def: ProtocolDefinition) -> Result<()> {
        if self.protocols.contains_key(&def.id) {
            return Err(LabqueueError::ConfigError(format!(
                "protocol '{}' is registered more than once",
                def.id
            )));
        }
        debug!(protocol = %def.id, category = %def.category, "registered protocol");
        self.protocols.insert(def.id.clone(), def);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ProtocolDefinition> {
        self.protocols.get(id)
    }

    /// Look up a protocol that belongs to the given workcell.
    pub fn lookup(&self, workcell: &str, id: &str) -> Result<&ProtocolDefinition> {
        self.protocols
            .get(id)
            .filter(|def| def.workcell == workcell)
            .ok_or_else(|| LabqueueError::ProtocolNotFound(id.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolDefinition> {
        self.protocols.values()
    }

    pub fn len(&self) -> usize {
        self.protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

fn definition_from_config(
    cfg: &ConfigFile,
    id: &str,
    pc: &ProtocolConfig,
) -> Result<ProtocolDefinition> {
    let schema = ParamSchema::new(pc.param.clone())?;

    let mut steps = Vec::with_capacity(pc.step.len());
    for step in &pc.step {
        let tool = cfg.tool.get(&step.tool).ok_or_else(|| {
            LabqueueError::ConfigError(format!(
                "protocol '{}' references unknown tool '{}'",
                id, step.tool
            ))
        })?;
        steps.push(TemplateStep {
            step: step.clone(),
            tool_type: tool.tool_type.clone(),
        });
    }

    Ok(ProtocolDefinition {
        id: id.to_string(),
        name: pc.name.clone().unwrap_or_else(|| id.to_string()),
        category: pc.category,
        workcell: pc
            .workcell
            .clone()
            .unwrap_or_else(|| cfg.workcell.name.clone()),
        description: pc.description.clone(),
        schema,
        expander: Expander::Template(steps),
    })
}
