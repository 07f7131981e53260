//! Time-range retrieval with per-agent grouping.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::storage::{SeriesRow, SqliteStore, StorageResult};

use super::{Aggregation, LabelFilter};

/// One output sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimePoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Fetch every point in `[start, end]` for the matching series, group by
/// `(agent, timestamp)`, and reduce across series within each group.
///
/// `step` rebuckets timestamps to `floor(ts / step) * step` before
/// grouping, which downsamples long ranges. With `Aggregation::None` the
/// points are returned unreduced (multiple sensors stay distinct rows).
#[allow(clippy::too_many_arguments)]
pub async fn timeseries(
    store: &SqliteStore,
    metric_names: &[String],
    start: i64,
    end: i64,
    agent_ids: Option<&[String]>,
    filter: &LabelFilter,
    aggregation: Aggregation,
    step: Option<i64>,
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

    let points = store.points_in_range(&candidates, start, end).await?;
    let agent_of = series_agents(&candidates);

    let mut out: BTreeMap<String, Vec<TimePoint>> = BTreeMap::new();

    if aggregation == Aggregation::None {
        for point in &points {
            let Some(agent) = agent_of.get(&point.series_id) else {
                continue;
            };
            out.entry(agent.clone()).or_default().push(TimePoint {
                timestamp: bucket(point.timestamp, step),
                value: point.value.as_f64(),
            });
        }
        for series in out.values_mut() {
            series.sort_by_key(|p| p.timestamp);
        }
        return Ok(out);
    }

    // (agent, bucketed timestamp) -> values across series
    let mut groups: BTreeMap<(String, i64), Vec<f64>> = BTreeMap::new();
    for point in &points {
        let Some(agent) = agent_of.get(&point.series_id) else {
            continue;
        };
        groups
            .entry((agent.clone(), bucket(point.timestamp, step)))
            .or_default()
            .push(point.value.as_f64());
    }

    for ((agent, timestamp), values) in groups {
        if let Some(value) = aggregation.reduce(&values) {
            out.entry(agent)
                .or_default()
                .push(TimePoint { timestamp, value });
        }
    }

    // BTreeMap iteration already yielded ascending timestamps per agent,
    // but make the contract explicit.
    for series in out.values_mut() {
        series.sort_by_key(|p| p.timestamp);
    }

    Ok(out)
}

pub(super) fn series_agents(series: &[SeriesRow]) -> BTreeMap<i64, String> {
    series
        .iter()
        .map(|s| (s.series_id, s.agent_id.clone()))
        .collect()
}

fn bucket(timestamp: i64, step: Option<i64>) -> i64 {
    match step {
        Some(step) if step > 0 => (timestamp / step) * step,
        _ => timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_floors() {
        assert_eq!(bucket(1_700_000_129, Some(60)), 1_700_000_100);
        assert_eq!(bucket(1_700_000_129, None), 1_700_000_129);
        assert_eq!(bucket(1_700_000_129, Some(0)), 1_700_000_129);
    }
}
