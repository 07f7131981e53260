//! Composite fraction of two latest values.
//!
//! `(latest(numerator) / latest(denominator)) * multiplier`, `None` when
//! either side is missing or the denominator is zero. This backs disk and
//! memory percentage displays.

use crate::storage::{SqliteStore, StorageResult};

use super::{latest_value, Aggregation, LabelFilter};

/// One side of a fraction: a latest-value query specification.
#[derive(Debug, Clone)]
pub struct ValueSpec {
    pub metric_names: Vec<String>,
    pub filter: LabelFilter,
    pub aggregation: Aggregation,
}

impl ValueSpec {
    pub fn new(metric_name: &str) -> Self {
        Self {
            metric_names: vec![metric_name.to_string()],
            filter: LabelFilter::any(),
            aggregation: Aggregation::Max,
        }
    }

    pub fn with_filter(mut self, filter: LabelFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }
}

pub async fn fraction(
    store: &SqliteStore,
    agent_id: &str,
    numerator: &ValueSpec,
    denominator: &ValueSpec,
    multiplier: f64,
) -> StorageResult<Option<f64>> {
    let num = latest_value(
        store,
        agent_id,
        &numerator.metric_names,
        &numerator.filter,
        numerator.aggregation,
    )
    .await?;
    let den = latest_value(
        store,
        agent_id,
        &denominator.metric_names,
        &denominator.filter,
        denominator.aggregation,
    )
    .await?;

    Ok(match (num, den) {
        (Some(n), Some(d)) if d != 0.0 => Some(n / d * multiplier),
        _ => None,
    })
}
