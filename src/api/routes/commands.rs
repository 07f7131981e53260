//! Command plane endpoints: enqueue, poll, results, status.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::auth::{authenticate, require_admin, Identity};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::commands::{ttl_for, CommandEnvelope, CommandRequest, CommandResultReport, CommandStatus};
use crate::storage::CommandRow;

/// POST /api/commands (admin)
///
/// Enqueues a command for one agent. If the agent holds a live command
/// stream the envelope is pushed immediately; otherwise the next poll
/// picks it up. Payloads are accepted opaquely; an unknown type fails on
/// the agent, not here.
pub async fn create_command(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    if request.command_type.trim().is_empty() {
        return Err(ApiError::bad_request("command_type must not be empty"));
    }

    if state.store.get_agent(&request.agent_id).await?.is_none() {
        return Err(ApiError::not_found("agent not found"));
    }

    let now = chrono::Utc::now().timestamp();
    let payload = serde_json::to_string(&request.payload)
        .map_err(|e| ApiError::bad_request(format!("unserializable payload: {e}")))?;

    let command = state
        .store
        .create_command(
            &request.agent_id,
            &request.command_type,
            &payload,
            now,
            ttl_for(&request.command_type),
        )
        .await?;

    state
        .audit
        .admin_action(
            "command_created",
            json!({
                "command_id": command.command_id,
                "agent_id": command.agent_id,
                "command_type": command.command_type,
            }),
        )
        .await;

    // Streaming path. Delivery marking is conditional on `pending`, so a
    // concurrent poll and a stream push cannot double-deliver.
    let mut status = command.status;
    if state
        .streams
        .push(&request.agent_id, envelope_of(&command))
        .await
    {
        debug!("command {} pushed over stream", command.command_id);
        status = CommandStatus::Delivered;
    }

    info!(
        "command {} ({}) queued for {}",
        command.command_id, command.command_type, command.agent_id
    );

    Ok(Json(json!({
        "command_id": command.command_id,
        "agent_id": command.agent_id,
        "status": status,
    })))
}

/// GET /api/commands/{agent_id}
///
/// Agent poll: atomically returns and marks delivered all pending
/// commands, FIFO. Admins may peek without flipping delivery state.
pub async fn poll_commands(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let identity = authenticate(&state, &headers).await?;
    if !identity.may_access_agent(&agent_id) {
        return Err(ApiError::forbidden(
            "token does not belong to the requested agent",
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let commands: Vec<CommandEnvelope> = match identity {
        Identity::Agent { .. } => {
            state.store.touch_last_seen(&agent_id, now).await?;
            state
                .store
                .take_pending_commands(&agent_id, now)
                .await?
                .iter()
                .map(envelope_of)
                .collect()
        }
        // Admin peek at the queue; delivery state is untouched.
        Identity::Admin => state
            .store
            .pending_commands(&agent_id)
            .await?
            .iter()
            .map(envelope_of)
            .collect(),
    };

    Ok(Json(json!({ "commands": commands })))
}

/// GET /api/command/{command_id} (admin)
///
/// Full status/result readback for a single command.
pub async fn command_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(command_id): Path<i64>,
) -> ApiResult<Json<CommandRow>> {
    require_admin(&state, &headers).await?;

    let command = state
        .store
        .get_command(command_id)
        .await?
        .ok_or_else(|| ApiError::not_found("command not found"))?;

    Ok(Json(command))
}

/// POST /api/command-results
///
/// Agent-submitted execution outcome. Only the addressed agent may
/// terminalize, and only out of delivered/executing.
pub async fn submit_command_result(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(report): Json<CommandResultReport>,
) -> ApiResult<Json<Value>> {
    let identity = authenticate(&state, &headers).await?;
    let agent_id = identity
        .agent_id()
        .ok_or_else(|| ApiError::bad_request("command results require an agent token"))?
        .to_string();

    apply_result(&state, &agent_id, &report).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Shared settlement path for the HTTP route and the stream.
pub async fn apply_result(
    state: &ApiState,
    agent_id: &str,
    report: &CommandResultReport,
) -> Result<(), ApiError> {
    let command = state
        .store
        .get_command(report.command_id)
        .await?
        .ok_or_else(|| ApiError::not_found("command not found"))?;

    if command.agent_id != agent_id {
        return Err(ApiError::forbidden("command not owned by this agent"));
    }

    let status = match report.status.as_str() {
        "completed" => CommandStatus::Completed,
        "failed" => CommandStatus::Failed,
        "executing" => {
            state.store.mark_executing(report.command_id, agent_id).await?;
            return Ok(());
        }
        other => {
            return Err(ApiError::bad_request(format!(
                "unsupported result status: {other}"
            )))
        }
    };

    let result_json = report
        .result
        .as_ref()
        .map(|v| serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()));
    let error = match (&report.error, &report.result, status) {
        (Some(e), _, _) => Some(e.clone()),
        (None, Some(v), CommandStatus::Failed) => {
            Some(v.get("error").and_then(Value::as_str).map_or_else(
                || v.to_string(),
                |s| s.to_string(),
            ))
        }
        (None, None, CommandStatus::Failed) => Some("unknown error".to_string()),
        _ => None,
    };

    let now = chrono::Utc::now().timestamp();
    let settled = state
        .store
        .settle_command(
            report.command_id,
            agent_id,
            status,
            result_json.as_deref(),
            error.as_deref(),
            now,
        )
        .await?;

    if !settled {
        return Err(ApiError::conflict(
            "command is not in a state that accepts results",
        ));
    }

    info!("command {} settled as {}", report.command_id, status);
    Ok(())
}

fn envelope_of(command: &CommandRow) -> CommandEnvelope {
    CommandEnvelope {
        command_id: command.command_id,
        agent_id: command.agent_id.clone(),
        command_type: command.command_type.clone(),
        payload: serde_json::from_str(&command.payload).unwrap_or(Value::Null),
        created_at: command.created_at,
    }
}
