//! Counter-rate derivation.
//!
//! For every sample timestamp `t` in range, the rate is computed from the
//! samples inside the closed look-back window `[t - window, t]` of one
//! series. A decrease anywhere in the window is a counter reset: the
//! measurement restarts at the reset point, and a window ending right at a
//! reset yields 0. Rates are never negative.
//!
//! When several series per agent survive filtering (rx + tx, one series
//! per disk, ...), rates are computed per series first and then reduced;
//! aggregating raw counter values before differentiating would be wrong
//! whenever series only partially overlap.

use std::collections::BTreeMap;

use crate::storage::{PointRow, SqliteStore, StorageResult};

use super::timeseries::{series_agents, TimePoint};
use super::{Aggregation, LabelFilter};

#[allow(clippy::too_many_arguments)]
pub async fn rate_timeseries(
    store: &SqliteStore,
    metric_names: &[String],
    start: i64,
    end: i64,
    agent_ids: Option<&[String]>,
    filter: &LabelFilter,
    window_sec: i64,
    aggregation: Aggregation,
    active_only_now: Option<i64>,
) -> StorageResult<BTreeMap<String, Vec<TimePoint>>> {
    let candidates = filter.apply(
        store
            .series_for_metrics(metric_names, agent_ids, active_only_now)
            .await?,
    );
    if candidates.is_empty() {
        return Ok(BTreeMap::new());
    }

    // Reach back one window before `start` so the earliest output
    // timestamps still have look-back data.
    let fetch_start = start.saturating_sub(window_sec);
    let points = store.points_in_range(&candidates, fetch_start, end).await?;
    let agent_of = series_agents(&candidates);

    // points_in_range returns (series_id, timestamp)-sorted rows.
    let mut per_series: BTreeMap<i64, Vec<PointRow>> = BTreeMap::new();
    for point in points {
        per_series.entry(point.series_id).or_default().push(point);
    }

    // (agent, timestamp) -> per-series rates to reduce
    let mut groups: BTreeMap<(String, i64), Vec<f64>> = BTreeMap::new();
    for (series_id, series_points) in &per_series {
        let Some(agent) = agent_of.get(series_id) else {
            continue;
        };
        for (timestamp, rate) in series_rates(series_points, start, end, window_sec) {
            groups
                .entry((agent.clone(), timestamp))
                .or_default()
                .push(rate);
        }
    }

    let mut out: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();
    for ((agent, timestamp), rates) in groups {
        if let Some(value) = aggregation.reduce(&rates) {
            out.entry(agent)
                .or_default()
                .push(TimePoint { timestamp, value });
        }
    }
    for series in out.values_mut() {
        series.sort_by_key(|p| p.timestamp);
    }

    Ok(out)
}

/// Rates for one series at its own sample timestamps within `[start, end]`.
///
/// `points` must be sorted ascending by timestamp.
pub fn series_rates(points: &[PointRow], start: i64, end: i64, window_sec: i64) -> Vec<(i64, f64)> {
    let mut rates = Vec::new();

    for (idx, point) in points.iter().enumerate() {
        let t = point.timestamp;
        if t < start || t > end {
            continue;
        }

        let window_start = t - window_sec;
        let window: Vec<&PointRow> = points[..=idx]
            .iter()
            .filter(|p| p.timestamp >= window_start)
            .collect();
        if window.len() < 2 {
            continue;
        }

        rates.push((t, window_rate(&window)));
    }

    rates
}

/// Rate over one window, restarting after the most recent counter reset.
fn window_rate(window: &[&PointRow]) -> f64 {
    // Index of the segment start: the point after the last decrease.
    let mut segment_start = 0;
    for i in 1..window.len() {
        if window[i].value.as_f64() < window[i - 1].value.as_f64() {
            segment_start = i;
        }
    }

    let first = window[segment_start];
    let last = window[window.len() - 1];
    let dt = last.timestamp - first.timestamp;
    if dt <= 0 {
        // The window ends at a reset (or a single-point segment).
        return 0.0;
    }

    let dv = last.value.as_f64() - first.value.as_f64();
    if dv < 0.0 {
        return 0.0;
    }
    dv / dt as f64
}
