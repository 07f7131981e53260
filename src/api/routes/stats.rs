//! Stats and liveness endpoints.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::api::auth::require_admin;
use crate::api::error::ApiResult;
use crate::api::state::ApiState;

/// GET /api/stats (admin)
pub async fn get_stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    let now = chrono::Utc::now().timestamp();
    let stats = state.store.stats(now).await?;
    let streams = state.streams.connected_count().await;

    Ok(Json(json!({
        "timestamp": now,
        "agents": { "total": stats.agents_total, "active": stats.agents_active },
        "series": stats.series_total,
        "points": { "int": stats.points_int, "float": stats.points_float },
        "log_entries": stats.log_entries,
        "commands_pending": stats.commands_pending,
        "command_streams": streams,
    })))
}

/// GET /health (admin)
pub async fn health(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    let db_ok = state.store.health_check().await;
    Ok(Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "db": if db_ok { "connected" } else { "down" },
    })))
}
