// src/config/validate.rs

use crate::config::model::{ConfigFile, ProtocolConfig, RawConfigFile};
use crate::errors::{LabqueueError, Result};
use crate::protocol::template::REPEAT_INDEX;
use crate::protocol::{MAX_RUN_COMMANDS, ParamKind, ParamSchema, RepeatCount, Value};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::LabqueueError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_workcell(cfg)?;
    validate_queue(cfg)?;
    validate_tools(cfg)?;
    for (id, pc) in cfg.protocol.iter() {
        validate_protocol(cfg, id, pc)?;
    }
    Ok(())
}

fn config_error(msg: String) -> LabqueueError {
    LabqueueError::ConfigError(msg)
}

fn validate_workcell(cfg: &RawConfigFile) -> Result<()> {
    if cfg.workcell.name.trim().is_empty() {
        return Err(config_error("[workcell].name must not be empty".to_string()));
    }
    Ok(())
}

fn validate_queue(cfg: &RawConfigFile) -> Result<()> {
    if cfg.queue.tick_interval_ms == 0 {
        return Err(config_error(
            "[queue].tick_interval_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.queue.dispatch_timeout_secs == 0 {
        return Err(config_error(
            "[queue].dispatch_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.alerts.timeout_secs == 0 {
        return Err(config_error(
            "[alerts].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(cfg: &RawConfigFile) -> Result<()> {
    for (id, tool) in cfg.tool.iter() {
        if tool.tool_type.trim().is_empty() {
            return Err(config_error(format!("[tool.{id}].type must not be empty")));
        }
        // Real dispatch needs somewhere to send commands.
        if !cfg.queue.simulate && tool.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(config_error(format!(
                "[tool.{id}].url is required unless [queue].simulate = true"
            )));
        }
    }
    Ok(())
}

fn validate_protocol(cfg: &RawConfigFile, id: &str, pc: &ProtocolConfig) -> Result<()> {
    if pc.step.is_empty() {
        return Err(config_error(format!(
            "protocol '{id}' must contain at least one [[protocol.{id}.step]]"
        )));
    }

    if let Some(ref workcell) = pc.workcell {
        if *workcell != cfg.workcell.name {
            return Err(config_error(format!(
                "protocol '{id}' belongs to workcell '{workcell}' but this engine drives '{}'",
                cfg.workcell.name
            )));
        }
    }

    let schema = ParamSchema::new(pc.param.clone())
        .map_err(|e| config_error(format!("protocol '{id}': {e}")))?;

    if let Err(errors) = schema.validate_defaults() {
        return Err(config_error(format!(
            "protocol '{id}' has invalid parameter defaults: {errors}"
        )));
    }

    for (n, step) in pc.step.iter().enumerate() {
        if !cfg.tool.contains_key(&step.tool) {
            return Err(config_error(format!(
                "protocol '{id}' step {n} references unknown tool '{}'",
                step.tool
            )));
        }

        match step.repeat {
            Some(RepeatCount::Times(times)) if times < 0 => {
                return Err(config_error(format!(
                    "protocol '{id}' step {n} has negative repeat count {times}"
                )));
            }
            Some(RepeatCount::Times(times)) if times > MAX_RUN_COMMANDS as i64 => {
                return Err(config_error(format!(
                    "protocol '{id}' step {n} repeats {times} times, limit is {MAX_RUN_COMMANDS}"
                )));
            }
            Some(RepeatCount::Param(ref name)) => match schema.field(name) {
                Some(field) if field.kind == ParamKind::Integer => {
                    // A run's size must be bounded by its schema.
                    if field.max.is_none_or(|max| max > MAX_RUN_COMMANDS as f64) {
                        return Err(config_error(format!(
                            "protocol '{id}' step {n} repeats on '{name}', which needs a max of at most {MAX_RUN_COMMANDS}"
                        )));
                    }
                }
                Some(_) => {
                    return Err(config_error(format!(
                        "protocol '{id}' step {n} repeats on '{name}', which is not an integer parameter"
                    )));
                }
                None => {
                    return Err(config_error(format!(
                        "protocol '{id}' step {n} repeats on undeclared parameter '{name}'"
                    )));
                }
            },
            _ => {}
        }

        if let Some((key, _)) = step.params.iter().find(|(_, v)| !Value::is_finite(v)) {
            return Err(config_error(format!(
                "protocol '{id}' step {n} param '{key}' is not a finite number"
            )));
        }

        for name in step.placeholders() {
            let is_index = name == REPEAT_INDEX && step.repeat.is_some();
            if !is_index && schema.field(&name).is_none() {
                return Err(config_error(format!(
                    "protocol '{id}' step {n} uses placeholder '${{{name}}}' for an undeclared parameter"
                )));
            }
        }
    }

    Ok(())
}
