//! Metric batch ingestion.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::authenticate;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::SampleBatch;

/// POST /api/metrics
///
/// Accepts a batch from an authenticated agent. Per-sample failures are
/// reported in the summary without aborting siblings; the embedded
/// `agent_id` must match the bearer identity.
pub async fn submit_metrics(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(batch): Json<SampleBatch>,
) -> ApiResult<Json<Value>> {
    let identity = authenticate(&state, &headers).await?;
    let agent_id = identity
        .agent_id()
        .ok_or_else(|| ApiError::bad_request("metric submission requires an agent token"))?;

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
    let summary = state.ingestor.ingest(agent_id, &batch, now).await?;

    // Logs may piggyback on the metrics push to save a round trip.
    let logs_inserted = if batch.logs.is_empty() {
        0
    } else {
        state.store.insert_logs(agent_id, &batch.logs, now).await?
    };

    let mut response = serde_json::to_value(&summary).unwrap_or_else(|_| json!({}));
    if logs_inserted > 0 {
        response["logs_inserted"] = json!(logs_inserted);
    }
    Ok(Json(response))
}
