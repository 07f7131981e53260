//! Agent listing, verification, and revocation.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::api::auth::{authenticate, require_admin, Identity};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::VerifyResponse;

/// GET /api/client/verify
///
/// Returns the caller's own identity if the bearer is valid; also bumps
/// `last_seen`, so installers can use it as a post-enrollment probe.
pub async fn verify_client(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<VerifyResponse>> {
    let identity = authenticate(&state, &headers).await?;
    let agent_id = identity
        .agent_id()
        .ok_or_else(|| ApiError::bad_request("verify requires an agent bearer token"))?;

    let agent = state
        .store
        .get_agent(agent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("agent not found"))?;

    let now = chrono::Utc::now().timestamp();
    state.store.touch_last_seen(agent_id, now).await?;

    Ok(Json(VerifyResponse {
        agent_id: agent.agent_id,
        hostname: agent.hostname,
        last_seen: Some(now),
    }))
}

/// GET /api/clients (admin)
pub async fn list_clients(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    let agents = state.store.list_agents().await?;
    let count = agents.len();
    Ok(Json(json!({ "agents": agents, "count": count })))
}

/// DELETE /api/clients/{agent_id} (admin)
///
/// Revokes the bearer and deletes the agent; series, points, logs, and
/// commands go with it.
pub async fn revoke_client(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    match authenticate(&state, &headers).await? {
        Identity::Admin => {}
        Identity::Agent { .. } => {
            return Err(ApiError::forbidden("only admins may revoke agents"))
        }
    }

    if !state.store.delete_agent(&agent_id).await? {
        return Err(ApiError::not_found("agent not found"));
    }
    state.ingestor.evict_agent(&agent_id).await;

    state
        .audit
        .admin_action("agent_revoked", json!({"agent_id": agent_id}))
        .await;
    info!("agent revoked: {agent_id}");

    Ok(Json(json!({ "revoked": agent_id })))
}
