// src/protocol/template.rs

//! Step templates for protocols declared in the config file.
//!
//! A template step names a tool, an opcode and a parameter payload in which
//! `${name}` placeholders refer to protocol parameters. Expansion is pure:
//! it only reads the validated parameters.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::protocol::schema::ValidatedParams;
use crate::protocol::value::{ParamMap, Value};
use crate::protocol::{AdvancedParameters, CommandSpec, ExpansionError, MAX_RUN_COMMANDS};

/// Name bound to the 0-based iteration inside a repeated step.
pub const REPEAT_INDEX: &str = "index";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
});

/// How many times a step is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RepeatCount {
    /// Literal count.
    Times(i64),
    /// Name of an integer parameter holding the count.
    Param(String),
}

/// `[[protocol.<id>.step]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tool id, must exist in `[tool.<id>]`.
    pub tool: String,

    pub command: String,

    #[serde(default)]
    pub params: ParamMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatCount>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedParameters>,
}

impl StepTemplate {
    /// Every placeholder name referenced by the label or the payload.
    pub fn placeholders(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        if let Some(ref label) = self.label {
            collect_placeholders(label, &mut names);
        }
        for value in self.params.values() {
            collect_value_placeholders(value, &mut names);
        }
        names
    }
}

/// A template step with its tool type resolved from the tool table.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateStep {
    pub step: StepTemplate,
    pub tool_type: String,
}

/// Expand template steps into concrete commands.
pub fn expand_steps(
    steps: &[TemplateStep],
    params: &ValidatedParams,
) -> Result<Vec<CommandSpec>, ExpansionError> {
    let mut commands = Vec::new();

    for (n, resolved) in steps.iter().enumerate() {
        let step = &resolved.step;
        let times = repeat_times(step, params)
            .map_err(|e| ExpansionError(format!("step {n} ({}): {}", step.command, e.0)))?;
        if times > (MAX_RUN_COMMANDS - commands.len()) as i64 {
            return Err(ExpansionError(format!(
                "step {n} ({}) would grow the run past {MAX_RUN_COMMANDS} commands",
                step.command
            )));
        }

        for index in 0..times {
            let scope = Scope {
                params,
                index: step.repeat.as_ref().map(|_| index),
            };

            let label = step
                .label
                .as_deref()
                .map(|l| interpolate(l, &scope))
                .transpose()?;

            let mut payload = ParamMap::new();
            for (key, value) in &step.params {
                payload.insert(key.clone(), substitute(value, &scope)?);
            }

            commands.push(CommandSpec {
                label,
                tool_id: step.tool.clone(),
                tool_type: resolved.tool_type.clone(),
                command: step.command.clone(),
                params: payload,
                advanced_parameters: step.advanced.clone(),
            });
        }
    }

    Ok(commands)
}

fn repeat_times(step: &StepTemplate, params: &ValidatedParams) -> Result<i64, ExpansionError> {
    let count = match step.repeat {
        None => return Ok(1),
        Some(RepeatCount::Times(n)) => n,
        Some(RepeatCount::Param(ref name)) => params
            .get(name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ExpansionError(format!("repeat parameter '{name}' has no integer value")))?,
    };

    if count < 0 {
        return Err(ExpansionError(format!("negative repeat count {count}")));
    }
    Ok(count)
}

struct Scope<'a> {
    params: &'a ValidatedParams,
    index: Option<i64>,
}

impl Scope<'_> {
    fn lookup(&self, name: &str) -> Result<Value, ExpansionError> {
        if name == REPEAT_INDEX {
            if let Some(i) = self.index {
                return Ok(Value::Integer(i));
            }
        }
        self.params
            .get(name)
            .cloned()
            .ok_or_else(|| ExpansionError(format!("placeholder '${{{name}}}' has no value")))
    }
}

fn substitute(value: &Value, scope: &Scope<'_>) -> Result<Value, ExpansionError> {
    match value {
        Value::String(s) => {
            // A lone placeholder keeps the parameter's type.
            if let Some(caps) = PLACEHOLDER.captures(s) {
                if caps.get(0).map(|m| m.as_str().len()) == Some(s.len()) {
                    return scope.lookup(&caps[1]);
                }
            }
            interpolate(s, scope).map(Value::String)
        }
        Value::List(items) => items
            .iter()
            .map(|v| substitute(v, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Map(map) => {
            let mut out = ParamMap::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, scope)?);
            }
            Ok(Value::Map(out))
        }
        other => Ok(other.clone()),
    }
}

fn interpolate(text: &str, scope: &Scope<'_>) -> Result<String, ExpansionError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&text[last..whole.start()]);
        out.push_str(&scope.lookup(&caps[1])?.to_string());
        last = whole.end();
    }
    out.push_str(&text[last..]);

    Ok(out)
}

fn collect_placeholders(text: &str, names: &mut BTreeSet<String>) {
    for caps in PLACEHOLDER.captures_iter(text) {
        names.insert(caps[1].to_string());
    }
}

fn collect_value_placeholders(value: &Value, names: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => collect_placeholders(s, names),
        Value::List(items) => items.iter().for_each(|v| collect_value_placeholders(v, names)),
        Value::Map(map) => map.values().for_each(|v| collect_value_placeholders(v, names)),
        _ => {}
    }
}
