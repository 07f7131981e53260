//! Latest-value queries.
//!
//! Semantics: fetch the newest point of every candidate series, then
//! reduce that set with the requested aggregation. With no aggregation
//! and several candidates, the series with the smallest id supplies the
//! answer (a deterministic tie-break, not an error).

use crate::storage::{SqliteStore, StorageResult};

use super::{Aggregation, LabelFilter};

pub async fn latest_value(
    store: &SqliteStore,
    agent_id: &str,
    metric_names: &[String],
    filter: &LabelFilter,
    aggregation: Aggregation,
) -> StorageResult<Option<f64>> {
    let candidates = filter.apply(store.series_for_agent(agent_id, metric_names).await?);
    if candidates.is_empty() {
        return Ok(None);
    }

    let mut newest = store.latest_points(&candidates).await?;
    if newest.is_empty() {
        return Ok(None);
    }

    // Smallest series_id first so Aggregation::None is deterministic.
    newest.sort_by_key(|p| p.series_id);
    let values: Vec<f64> = newest.iter().map(|p| p.value.as_f64()).collect();

    Ok(aggregation.reduce(&values))
}
