// src/config/mod.rs

//! Configuration loading and validation for labqueue.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate tool references, protocol templates and queue settings
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    CONFIG_ENV, config_path_from, default_config_path, load_and_validate, load_from_path, parse_str,
    resolve_config_path,
};
pub use model::{
    AlertsSection, ConfigFile, ProtocolConfig, QueueSection, RawConfigFile, ServerSection,
    ToolConfig, WorkcellSection,
};
