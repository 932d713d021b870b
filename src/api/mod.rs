// src/api/mod.rs

//! HTTP API over the queue service.
//!
//! Handlers only read snapshots or call control operations on the shared
//! [`QueueHandle`]; they never touch queue state directly.

pub mod errors;
pub mod handlers;

use std::future::Future;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::QueueHandle;
use crate::errors::Result;

pub use errors::ApiError;

pub fn build_router(queue: QueueHandle) -> Router {
    Router::new()
        .route("/runs", get(handlers::list_runs).post(handlers::create_run))
        .route("/runs/{id}", get(handlers::get_run))
        .route("/protocols", get(handlers::list_protocols))
        .route("/queue/state", get(handlers::queue_state))
        .route("/queue/commands", get(handlers::queue_commands))
        .route("/queue/restart", post(handlers::restart))
        .route("/queue/stop", post(handlers::stop))
        .route("/queue/clear-all", post(handlers::clear_all))
        .route("/queue/clear-completed", post(handlers::clear_completed))
        .route("/queue/commands/{id}/skip", post(handlers::skip_command))
        .route(
            "/queue/commands/{id}/skip-until",
            post(handlers::skip_commands_until),
        )
        .with_state(queue)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    queue: QueueHandle,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "http api listening");

    axum::serve(listener, build_router(queue))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("http api stopped");
    Ok(())
}
