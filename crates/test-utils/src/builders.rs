// crates/test-utils/src/builders.rs

#![allow(dead_code)]

use labqueue::config::{ConfigFile, ProtocolConfig, RawConfigFile, ToolConfig};
use labqueue::protocol::{
    AdvancedParameters, ParamField, ParamKind, ProtocolRegistry, RepeatCount, StepTemplate, Value,
};
use labqueue::types::{OrphanPolicy, ProtocolCategory, StorageMode};

pub const WORKCELL: &str = "test-cell";

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile::default();
        config.workcell.name = WORKCELL.to_string();
        config.queue.simulate = true;
        Self { config }
    }

    pub fn with_workcell(mut self, name: &str) -> Self {
        self.config.workcell.name = name.to_string();
        self
    }

    /// Adds a tool; its type is the id, and it has no URL.
    pub fn with_tool(mut self, id: &str) -> Self {
        self.config.tool.insert(
            id.to_string(),
            ToolConfig {
                tool_type: id.to_string(),
                url: None,
            },
        );
        self
    }

    pub fn with_tool_url(mut self, id: &str, url: &str) -> Self {
        self.config.tool.insert(
            id.to_string(),
            ToolConfig {
                tool_type: id.to_string(),
                url: Some(url.to_string()),
            },
        );
        self
    }

    pub fn with_protocol(mut self, id: &str, protocol: ProtocolConfig) -> Self {
        self.config.protocol.insert(id.to_string(), protocol);
        self
    }

    pub fn simulate(mut self, val: bool) -> Self {
        self.config.queue.simulate = val;
        self
    }

    pub fn with_storage(mut self, mode: StorageMode, state_dir: &str) -> Self {
        self.config.queue.storage = mode;
        self.config.queue.state_dir = state_dir.to_string();
        self
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.config.queue.orphaned_commands = policy;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `ProtocolConfig`.
pub struct ProtocolBuilder {
    protocol: ProtocolConfig,
}

impl ProtocolBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            protocol: ProtocolConfig {
                name: Some(name.to_string()),
                category: ProtocolCategory::Development,
                workcell: None,
                description: None,
                param: Vec::new(),
                step: Vec::new(),
            },
        }
    }

    pub fn category(mut self, category: ProtocolCategory) -> Self {
        self.protocol.category = category;
        self
    }

    pub fn workcell(mut self, workcell: &str) -> Self {
        self.protocol.workcell = Some(workcell.to_string());
        self
    }

    pub fn param(mut self, field: ParamField) -> Self {
        self.protocol.param.push(field);
        self
    }

    pub fn step(mut self, step: StepTemplate) -> Self {
        self.protocol.step.push(step);
        self
    }

    pub fn build(self) -> ProtocolConfig {
        self.protocol
    }
}

/// Builder for `ParamField`.
pub struct ParamBuilder {
    field: ParamField,
}

impl ParamBuilder {
    pub fn new(name: &str, kind: ParamKind) -> Self {
        Self {
            field: ParamField::new(name, kind),
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.field.default = Some(value.into());
        self
    }

    pub fn required(mut self, val: bool) -> Self {
        self.field.required = Some(val);
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.field.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.field.max = Some(max);
        self
    }

    pub fn choices(mut self, choices: Vec<Value>) -> Self {
        self.field.choices = Some(choices);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.field.pattern = Some(pattern.to_string());
        self
    }

    pub fn build(self) -> ParamField {
        self.field
    }
}

/// Builder for `StepTemplate`.
pub struct StepBuilder {
    step: StepTemplate,
}

impl StepBuilder {
    pub fn new(tool: &str, command: &str) -> Self {
        Self {
            step: StepTemplate {
                label: None,
                tool: tool.to_string(),
                command: command.to_string(),
                params: Default::default(),
                repeat: None,
                advanced: None,
            },
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.step.label = Some(label.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.step.params.insert(key.to_string(), value.into());
        self
    }

    pub fn repeat_times(mut self, n: i64) -> Self {
        self.step.repeat = Some(RepeatCount::Times(n));
        self
    }

    pub fn repeat_param(mut self, name: &str) -> Self {
        self.step.repeat = Some(RepeatCount::Param(name.to_string()));
        self
    }

    pub fn skip_variable(mut self, var: &str) -> Self {
        self.step.advanced = Some(AdvancedParameters {
            skip_execution_variable: Some(var.to_string()),
            run_async: false,
        });
        self
    }

    pub fn build(self) -> StepTemplate {
        self.step
    }
}

/// Config with one parameterless protocol `id` made of `n` steps on tool
/// `arm` (commands `step0`, `step1`, ...).
pub fn linear_config(id: &str, n: usize) -> ConfigFile {
    let mut protocol = ProtocolBuilder::new(id);
    for i in 0..n {
        protocol = protocol.step(StepBuilder::new("arm", &format!("step{i}")).build());
    }
    ConfigFileBuilder::new()
        .with_tool("arm")
        .with_protocol(id, protocol.build())
        .build()
}

/// Registry with one parameterless protocol `id` made of `n` steps.
pub fn linear_registry(id: &str, n: usize) -> ProtocolRegistry {
    ProtocolRegistry::from_config(&linear_config(id, n)).expect("valid registry")
}
