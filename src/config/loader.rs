// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "LABQUEUE_CONFIG";

/// Read and deserialize a config file. No semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let raw = parse_str(&contents)?;
    debug!(
        path = ?path,
        tools = raw.tool.len(),
        protocols = raw.protocol.len(),
        "config file parsed"
    );
    Ok(raw)
}

/// Deserialize config TOML held in memory.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(contents)?)
}

/// Read, deserialize and validate a config file.
///
/// Validation rejects steps naming unknown tools, placeholders without a
/// declared parameter, defaults that break their own constraints, and zero
/// queue timings.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// Pick the config file: `--config`, then `$LABQUEUE_CONFIG`, then
/// `Labqueue.toml` in the working directory.
pub fn resolve_config_path(cli: Option<&str>) -> PathBuf {
    let from_env = std::env::var(CONFIG_ENV).ok();
    config_path_from(cli, from_env.as_deref())
}

/// [`resolve_config_path`] with the environment value passed in.
pub fn config_path_from(cli: Option<&str>, env: Option<&str>) -> PathBuf {
    cli.or(env.filter(|p| !p.trim().is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("Labqueue.toml")
}
