//! Per-request identity resolution.
//!
//! Two credential forms:
//! - `Authorization: Bearer <token>` - admin token or an agent bearer;
//!   agent tokens are matched constant-time against the stored set
//! - `Authorization: Basic <b64(user:admin_token)>` - admin only; the
//!   username is ignored
//!
//! Failures are recorded in the audit log with a token prefix only.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use tracing::warn;

use crate::audit::token_prefix;
use crate::auth::constant_time_eq;

use super::error::ApiError;
use super::state::ApiState;

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Admin,
    Agent { agent_id: String },
}

impl Identity {
    /// Admins pass; agents only for their own resources.
    pub fn may_access_agent(&self, agent_id: &str) -> bool {
        match self {
            Identity::Admin => true,
            Identity::Agent { agent_id: own } => own == agent_id,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Identity::Agent { agent_id } => Some(agent_id),
            Identity::Admin => None,
        }
    }
}

/// Resolve the request identity or fail with 401.
pub async fn authenticate(state: &ApiState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthenticated("missing Authorization header"))?;

    if let Some(encoded) = header.strip_prefix("Basic ") {
        return authenticate_basic(state, encoded).await;
    }

    if let Some(token) = header.strip_prefix("Bearer ") {
        return authenticate_bearer(state, token).await;
    }

    Err(ApiError::unauthenticated(
        "unsupported Authorization scheme (expected Bearer or Basic)",
    ))
}

/// Authenticate and require admin rights in one step.
pub async fn require_admin(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    match authenticate(state, headers).await? {
        Identity::Admin => Ok(()),
        Identity::Agent { .. } => Err(ApiError::forbidden("admin credentials required")),
    }
}

async fn authenticate_basic(state: &ApiState, encoded: &str) -> Result<Identity, ApiError> {
    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok());

    let password = decoded
        .as_deref()
        .and_then(|credentials| credentials.split_once(':'))
        .map(|(_user, password)| password);

    if let Some(password) = password {
        if state.auth.check_admin_token(password) {
            state
                .audit
                .auth_attempt(true, "admin_basic", json!({}))
                .await;
            return Ok(Identity::Admin);
        }
    }

    state
        .audit
        .auth_attempt(false, "admin_basic", json!({"reason": "invalid_credentials"}))
        .await;
    warn!("admin authentication failed");
    Err(ApiError::unauthenticated("invalid admin credentials"))
}

async fn authenticate_bearer(state: &ApiState, token: &str) -> Result<Identity, ApiError> {
    // The admin token is also accepted as a bearer (installer convenience).
    if state.auth.check_admin_token(token) {
        state
            .audit
            .auth_attempt(true, "admin_bearer", json!({}))
            .await;
        return Ok(Identity::Admin);
    }

    // Compare against every stored agent token; no early exit on match so
    // timing reveals nothing about prefix proximity.
    let tokens = state.store.list_agent_tokens().await?;
    let mut matched: Option<String> = None;
    for (stored, agent_id) in &tokens {
        if constant_time_eq(stored.as_bytes(), token.as_bytes()) {
            matched = Some(agent_id.clone());
        }
    }

    match matched {
        Some(agent_id) => Ok(Identity::Agent { agent_id }),
        None => {
            state
                .audit
                .auth_attempt(
                    false,
                    "client_bearer",
                    json!({"token_prefix": token_prefix(token)}),
                )
                .await;
            warn!("client authentication failed ({}...)", token_prefix(token));
            Err(ApiError::unauthenticated("invalid client token"))
        }
    }
}
