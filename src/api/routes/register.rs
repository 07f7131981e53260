//! Agent enrollment.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::error::{ApiError, ApiResult, ErrorKind};
use crate::api::state::ApiState;
use crate::auth::service::generate_bearer_token;
use crate::storage::AgentRow;
use crate::{RegistrationRequest, RegistrationResponse};

/// Registration body: the signed request plus the one-time admin token.
#[derive(Debug, Deserialize)]
pub struct RegistrationSubmission {
    #[serde(flatten)]
    pub request: RegistrationRequest,
    pub admin_token: String,
}

/// POST /api/clients/register
///
/// Admin-token-gated challenge-response enrollment. Idempotent for the
/// same `agent_id` + public key; a different key for a known id is a
/// conflict until an admin purges the agent.
pub async fn register_agent(
    State(state): State<ApiState>,
    Json(body): Json<RegistrationSubmission>,
) -> ApiResult<Json<RegistrationResponse>> {
    let request = &body.request;
    let now = chrono::Utc::now().timestamp();

    if !state.auth.check_admin_token(&body.admin_token) {
        state
            .audit
            .registration(false, &request.agent_id, &request.hostname, "bad admin token")
            .await;
        return Err(ApiError::unauthenticated("invalid admin token"));
    }

    if let Err(e) = state.auth.validate_registration(request, now) {
        state
            .audit
            .registration(false, &request.agent_id, &request.hostname, &e.to_string())
            .await;
        return Err(ApiError::bad_request(e.to_string()));
    }

    if let Some(existing) = state.store.get_agent(&request.agent_id).await? {
        if existing.public_key.trim() == request.public_key.trim() {
            // Same identity, same key: hand the stored token back.
            state.store.touch_last_seen(&request.agent_id, now).await?;
            state
                .audit
                .registration(true, &request.agent_id, &request.hostname, "existing agent")
                .await;
            info!(
                "existing agent re-registered: {} ({})",
                request.agent_id, request.hostname
            );
            return Ok(Json(RegistrationResponse {
                agent_id: existing.agent_id,
                bearer_token: existing.bearer_token,
            }));
        }

        state
            .audit
            .registration(false, &request.agent_id, &request.hostname, "key mismatch")
            .await;
        return Err(ApiError::new(
            ErrorKind::AlreadyRegistered,
            "agent_id already registered with a different public key",
        ));
    }

    let bearer_token = generate_bearer_token();
    state
        .store
        .insert_agent(&AgentRow {
            agent_id: request.agent_id.clone(),
            hostname: request.hostname.clone(),
            public_key: request.public_key.clone(),
            bearer_token: bearer_token.clone(),
            registered_at: now,
            last_seen: Some(now),
            status: "active".to_string(),
        })
        .await?;

    state
        .audit
        .registration(true, &request.agent_id, &request.hostname, "new agent")
        .await;
    info!("new agent registered: {} ({})", request.agent_id, request.hostname);

    Ok(Json(RegistrationResponse {
        agent_id: request.agent_id.clone(),
        bearer_token,
    }))
}
