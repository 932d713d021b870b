// src/lib.rs

pub mod alerts;
pub mod api;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod protocol;
pub mod store;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::alerts::{AlertChannel, LogAlerts, WebhookAlerts};
use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_from_path, resolve_config_path};
use crate::dispatch::{HttpToolDispatcher, SimulatedDispatcher, ToolDispatcher};
use crate::engine::{
    QueueCore, QueueHandle, QueueRuntime, QueueState, RuntimeEvent, RuntimeOptions,
};
use crate::fs::RealFileSystem;
use crate::protocol::{Expander, ProtocolRegistry};
use crate::store::journal_for;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and the protocol registry
/// - run store journal and queue service
/// - tool dispatcher and alert channel
/// - the run loop and the HTTP API
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref());

    let mut raw = load_from_path(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;
    if args.simulate {
        raw.queue.simulate = true;
    }
    if let Some(storage) = args.storage {
        raw.queue.storage = storage;
    }
    if let Some(policy) = args.orphaned_commands {
        raw.queue.orphaned_commands = policy;
    }
    let cfg = ConfigFile::try_from(raw)?;
    let registry = ProtocolRegistry::from_config(&cfg)?;

    if args.dry_run {
        print_dry_run(&cfg, &registry);
        return Ok(());
    }

    let idle_state = if cfg.queue.simulate {
        QueueState::Simulated
    } else {
        QueueState::Ready
    };

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let journal = journal_for(
        cfg.queue.storage,
        &cfg.queue.state_dir,
        Arc::new(RealFileSystem),
    );

    let alerts: Arc<dyn AlertChannel> = match cfg.alerts.webhook_url {
        Some(ref url) => Arc::new(WebhookAlerts::new(
            url.clone(),
            cfg.workcell.name.clone(),
            Duration::from_secs(cfg.alerts.timeout_secs),
        )),
        None => Arc::new(LogAlerts::new(cfg.workcell.name.clone())),
    };

    let queue = QueueHandle::new(
        QueueCore::initializing(idle_state),
        Arc::new(registry),
        journal,
        alerts,
        rt_tx,
    );
    let orphans = queue.initialize(cfg.queue.orphaned_commands).await?;
    if !orphans.is_empty() {
        info!(
            count = orphans.len(),
            policy = ?cfg.queue.orphaned_commands,
            "reconciled commands left in flight by a previous process"
        );
    }

    let dispatcher: Box<dyn ToolDispatcher> = if cfg.queue.simulate {
        info!("simulation mode: commands are acknowledged without tool drivers");
        Box::new(SimulatedDispatcher::default())
    } else {
        Box::new(HttpToolDispatcher::from_config(&cfg))
    };

    let runtime = QueueRuntime::new(
        queue.clone(),
        rt_rx,
        dispatcher,
        RuntimeOptions::from_config(&cfg),
    );
    let runtime_task = tokio::spawn(runtime.run());

    let listen = args.listen.unwrap_or_else(|| cfg.server.listen.clone());
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding http api to {listen}"))?;

    // Ctrl-C → graceful shutdown of both the server and the run loop.
    let shutdown = {
        let queue = queue.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Ctrl+C received; shutting down");
            queue.request_shutdown().await;
        }
    };

    api::serve(listener, queue, shutdown).await?;
    runtime_task.await.context("run loop task panicked")??;
    Ok(())
}

/// Simple dry-run output: print the workcell, tools and protocols.
fn print_dry_run(cfg: &ConfigFile, registry: &ProtocolRegistry) {
    println!("labqueue dry-run");
    println!("  workcell = {}", cfg.workcell.name);
    println!("  queue.dispatch_timeout_secs = {}", cfg.queue.dispatch_timeout_secs);
    println!("  queue.storage = {:?}", cfg.queue.storage);
    println!("  queue.simulate = {}", cfg.queue.simulate);
    println!();

    println!("tools ({}):", cfg.tool.len());
    for (id, tool) in cfg.tool.iter() {
        match tool.url {
            Some(ref url) => println!("  - {id} ({}) at {url}", tool.tool_type),
            None => println!("  - {id} ({})", tool.tool_type),
        }
    }
    println!();

    println!("protocols ({}):", registry.len());
    for def in registry.iter() {
        println!("  - {} \"{}\" [{}]", def.id, def.name, def.category);
        if let Some(ref description) = def.description {
            println!("      {description}");
        }
        for field in def.schema.fields() {
            let mut line = format!("      param {}: {:?}", field.name, field.kind);
            if let Some(ref default) = field.default {
                line.push_str(&format!(" = {default}"));
            } else if field.is_required() {
                line.push_str(" (required)");
            }
            println!("{line}");
        }
        if let Expander::Template(ref steps) = def.expander {
            for (i, t) in steps.iter().enumerate() {
                print!("      step {i}: {}.{}", t.step.tool, t.step.command);
                if let Some(ref repeat) = t.step.repeat {
                    print!(" x {repeat:?}");
                }
                println!();
            }
        }
    }

    debug!("dry-run complete (nothing started)");
}
