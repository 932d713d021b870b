// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::{OrphanPolicy, StorageMode};

/// Command-line arguments for `labqueue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "labqueue",
    version,
    about = "Run lab protocols as a single sequential queue of device commands.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Falls back to `LABQUEUE_CONFIG`, then `Labqueue.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LABQUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// HTTP API bind address; overrides `[server].listen`.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Parse + validate, print the protocol registry, but don't start the
    /// queue or the server.
    #[arg(long)]
    pub dry_run: bool,

    /// Acknowledge every command without talking to tool drivers.
    #[arg(long)]
    pub simulate: bool,

    /// Run store backend (`memory` or `file`); overrides `[queue].storage`.
    #[arg(long, value_name = "MODE")]
    pub storage: Option<StorageMode>,

    /// Startup handling of commands left `STARTED` (`fail` or `requeue`);
    /// overrides `[queue].orphaned_commands`.
    #[arg(long, value_name = "POLICY")]
    pub orphaned_commands: Option<OrphanPolicy>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
