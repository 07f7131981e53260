//! Time-series, rate, and latest-value queries (admin).

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::require_admin;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::query::{latest_value, rate_timeseries, timeseries, Aggregation, LabelFilter};

const DEFAULT_RANGE_SECS: i64 = 86_400;
const DEFAULT_RATE_WINDOW_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
pub struct TimeseriesQuery {
    /// Look-back range when no explicit bounds are given.
    pub seconds: Option<i64>,

    /// Explicit bounds for incremental / gap-filling queries.
    pub since_timestamp: Option<i64>,
    pub until_timestamp: Option<i64>,

    /// Comma-separated agent restriction.
    pub agent_ids: Option<String>,

    /// Restrict to agents seen within the last hour (default true).
    pub active_only: Option<bool>,

    pub aggregation: Option<String>,

    /// JSON label filter: `[{"k":"v"},...]` or a bare object.
    pub labels: Option<String>,

    /// Rebucket timestamps to this grid before reduction.
    pub step: Option<i64>,

    /// Rate look-back window in seconds (rate endpoint only).
    pub rate_window: Option<i64>,
}

struct ResolvedQuery {
    metric_names: Vec<String>,
    start: i64,
    end: i64,
    agent_ids: Option<Vec<String>>,
    filter: LabelFilter,
    aggregation: Aggregation,
    active_only_now: Option<i64>,
}

fn resolve(
    metric_name: &str,
    query: &TimeseriesQuery,
    default_aggregation: Aggregation,
) -> Result<ResolvedQuery, ApiError> {
    let now = chrono::Utc::now().timestamp();

    let end = query.until_timestamp.unwrap_or(now);
    let start = match query.since_timestamp {
        Some(since) => since,
        None => end - query.seconds.unwrap_or(DEFAULT_RANGE_SECS),
    };

    // Comma-separated lists let one chart overlay related metrics.
    let metric_names: Vec<String> = metric_name
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if metric_names.is_empty() {
        return Err(ApiError::bad_request("no metric name given"));
    }

    let aggregation = match &query.aggregation {
        None => default_aggregation,
        Some(raw) => Aggregation::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unknown aggregation: {raw}")))?,
    };

    let filter = match &query.labels {
        None => LabelFilter::any(),
        Some(raw) => LabelFilter::parse(raw)
            .ok_or_else(|| ApiError::bad_request("labels must be a JSON label filter"))?,
    };

    let agent_ids = query.agent_ids.as_ref().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    });

    let active_only_now = match (agent_ids.is_some(), query.active_only.unwrap_or(true)) {
        (false, true) => Some(now),
        _ => None,
    };

    Ok(ResolvedQuery {
        metric_names,
        start,
        end,
        agent_ids,
        filter,
        aggregation,
        active_only_now,
    })
}

/// GET /api/timeseries/{metric_name} (admin)
pub async fn get_timeseries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(metric_name): Path<String>,
    Query(query): Query<TimeseriesQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let q = resolve(&metric_name, &query, Aggregation::Max)?;

    let data = timeseries(
        &state.store,
        &q.metric_names,
        q.start,
        q.end,
        q.agent_ids.as_deref(),
        &q.filter,
        q.aggregation,
        query.step,
        q.active_only_now,
    )
    .await?;

    Ok(Json(json!({
        "data": data,
        "time_range": { "start": q.start, "end": q.end },
        "metric": metric_name,
        "aggregation": q.aggregation.as_str(),
        "unit": "",
    })))
}

/// GET /api/timeseries/{metric_name}/rate (admin)
pub async fn get_rate_timeseries(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(metric_name): Path<String>,
    Query(query): Query<TimeseriesQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;
    let q = resolve(&metric_name, &query, Aggregation::Sum)?;

    let window_sec = query.rate_window.unwrap_or(DEFAULT_RATE_WINDOW_SECS).max(1);
    let data = rate_timeseries(
        &state.store,
        &q.metric_names,
        q.start,
        q.end,
        q.agent_ids.as_deref(),
        &q.filter,
        window_sec,
        q.aggregation,
        q.active_only_now,
    )
    .await?;

    Ok(Json(json!({
        "data": data,
        "time_range": { "start": q.start, "end": q.end },
        "metric": metric_name,
        "aggregation": q.aggregation.as_str(),
        "unit": "rate",
        "rate_window_sec": window_sec,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub agent_id: String,
    pub aggregation: Option<String>,
    pub labels: Option<String>,
}

/// GET /api/latest/{metric_name} (admin)
///
/// Newest point per candidate series, reduced with the aggregation.
pub async fn get_latest(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(metric_name): Path<String>,
    Query(query): Query<LatestQuery>,
) -> ApiResult<Json<Value>> {
    require_admin(&state, &headers).await?;

    let aggregation = match &query.aggregation {
        None => Aggregation::None,
        Some(raw) => Aggregation::parse(raw)
            .ok_or_else(|| ApiError::bad_request(format!("unknown aggregation: {raw}")))?,
    };
    let filter = match &query.labels {
        None => LabelFilter::any(),
        Some(raw) => LabelFilter::parse(raw)
            .ok_or_else(|| ApiError::bad_request("labels must be a JSON label filter"))?,
    };

    let metric_names: Vec<String> = metric_name
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let value = latest_value(
        &state.store,
        &query.agent_id,
        &metric_names,
        &filter,
        aggregation,
    )
    .await?;

    Ok(Json(json!({
        "agent_id": query.agent_id,
        "metric": metric_name,
        "value": value,
    })))
}
