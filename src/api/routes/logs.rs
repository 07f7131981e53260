//! Log batch ingestion.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::authenticate;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::LogBatch;

/// POST /api/logs
///
/// Append-only: identical-looking lines are distinct events, so there is
/// no deduplication here. Severity filtering happened agent-side; the
/// server stores whatever it accepts.
pub async fn submit_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(batch): Json<LogBatch>,
) -> ApiResult<Json<Value>> {
    let identity = authenticate(&state, &headers).await?;
    let agent_id = identity
        .agent_id()
        .ok_or_else(|| ApiError::bad_request("log submission requires an agent token"))?;

    if batch.agent_id != agent_id {
        return Err(ApiError::forbidden(
            "batch agent_id does not match the presented token",
        ));
    }

    let _permit = state
        .ingest_permits
        .try_acquire()
        .map_err(|_| ApiError::try_again_later())?;

    let now = chrono::Utc::now().timestamp();
    let inserted = state.store.insert_logs(agent_id, &batch.entries, now).await?;
    state.store.touch_last_seen(agent_id, now).await?;

    Ok(Json(json!({
        "received": batch.entries.len(),
        "inserted": inserted,
    })))
}
