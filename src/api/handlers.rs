// src/api/handlers.rs

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{QueueHandle, QueueStatus, SkipOutcome};
use crate::protocol::{ParamMap, ProtocolSummary};
use crate::store::{Run, RunCommand, RunStatus};

use super::errors::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub workcell_name: String,
    pub protocol_id: String,
    #[serde(default)]
    pub params: ParamMap,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRunResponse {
    pub id: Ulid,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunList {
    pub count: usize,
    pub data: Vec<Run>,
}

pub async fn create_run(
    State(queue): State<QueueHandle>,
    body: Result<Json<CreateRunRequest>, JsonRejection>,
) -> Result<Json<CreateRunResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    debug!(protocol = %req.protocol_id, workcell = %req.workcell_name, "create run request");

    let run = queue
        .create_run(&req.workcell_name, &req.protocol_id, &req.params)
        .await?;
    Ok(Json(CreateRunResponse {
        id: run.id,
        status: run.status,
    }))
}

pub async fn list_runs(State(queue): State<QueueHandle>) -> Json<RunList> {
    let data = queue.list_runs().await;
    Json(RunList {
        count: data.len(),
        data,
    })
}

pub async fn get_run(
    State(queue): State<QueueHandle>,
    Path(id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let run_id = Ulid::from_string(&id).map_err(|_| ApiError::not_found(format!("Run not found: {id}")))?;
    Ok(Json(queue.get_run(run_id).await?))
}

pub async fn list_protocols(State(queue): State<QueueHandle>) -> Json<Vec<ProtocolSummary>> {
    Json(queue.protocols())
}

pub async fn queue_state(State(queue): State<QueueHandle>) -> Json<QueueStatus> {
    Json(queue.status().await)
}

pub async fn queue_commands(State(queue): State<QueueHandle>) -> Json<Vec<RunCommand>> {
    Json(queue.commands().await)
}

pub async fn restart(State(queue): State<QueueHandle>) -> Json<QueueStatus> {
    Json(queue.restart().await)
}

pub async fn stop(State(queue): State<QueueHandle>) -> Json<QueueStatus> {
    Json(queue.stop().await)
}

pub async fn clear_all(State(queue): State<QueueHandle>) -> Json<QueueStatus> {
    Json(queue.clear_all().await)
}

pub async fn clear_completed(State(queue): State<QueueHandle>) -> Json<QueueStatus> {
    Json(queue.clear_completed().await)
}

pub async fn skip_command(
    State(queue): State<QueueHandle>,
    Path(id): Path<String>,
) -> Result<Json<SkipOutcome>, ApiError> {
    let queue_id = parse_queue_id(&id)?;
    Ok(Json(queue.skip_command(queue_id).await?))
}

pub async fn skip_commands_until(
    State(queue): State<QueueHandle>,
    Path(id): Path<String>,
) -> Result<Json<SkipOutcome>, ApiError> {
    let queue_id = parse_queue_id(&id)?;
    Ok(Json(queue.skip_commands_until(queue_id).await?))
}

fn parse_queue_id(id: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(id).map_err(|_| ApiError::not_found(format!("Command not found: {id}")))
}
