//! Metric ingestion pipeline.
//!
//! Reconciles submitted samples against the series catalog (creating
//! series on first sight; there is no predeclared metric namespace),
//! enforces the one-kind-per-series invariant, and appends points.
//!
//! Per-sample failures never abort sibling samples; the batch response
//! reports every rejection with its index and reason.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::storage::{NewPoint, PointValue, SqliteStore, StorageResult, ValueKind};
use crate::{IngestSummary, Labels, Sample, SampleBatch, SampleRejection};

/// Samples stamped further than this into the future are refused.
const MAX_FUTURE_SKEW_SECS: i64 = 300;

/// Largest magnitude a JSON number can carry without integer precision loss.
const MAX_SAFE_INT: f64 = 9_007_199_254_740_992.0; // 2^53

type CacheKey = (String, String, String);

/// Ingestion front end with an advisory series cache.
///
/// The cache is purely an optimization: a miss falls through to the
/// catalog table, and creation races are serialized by the catalog's
/// UNIQUE constraint rather than any lock here.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<SqliteStore>,
    series_cache: Arc<RwLock<HashMap<CacheKey, (i64, ValueKind)>>>,
}

impl Ingestor {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            series_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Process one authenticated batch. `agent_id` is the identity derived
    /// from the bearer token; the route layer has already rejected batches
    /// whose embedded id disagrees.
    #[instrument(skip(self, batch), fields(agent_id, samples = batch.samples.len()))]
    pub async fn ingest(
        &self,
        agent_id: &str,
        batch: &SampleBatch,
        now: i64,
    ) -> StorageResult<IngestSummary> {
        let mut summary = IngestSummary::default();
        let mut points = Vec::with_capacity(batch.samples.len());

        for (index, sample) in batch.samples.iter().enumerate() {
            match self.resolve_sample(agent_id, sample, now, &mut summary).await? {
                Ok(point) => points.push(point),
                Err(reason) => {
                    summary.rejected += 1;
                    summary.rejections.push(SampleRejection { index, reason });
                }
            }
        }

        summary.accepted = points.len();
        self.store.insert_points(&points, now).await?;
        self.store.touch_last_seen(agent_id, now).await?;

        debug!(
            "batch from {}: accepted {}, rejected {}, created {} series",
            agent_id, summary.accepted, summary.rejected, summary.series_created
        );
        Ok(summary)
    }

    /// Validate one sample and map it onto its series.
    ///
    /// The outer result is a storage failure; the inner one is the
    /// per-sample verdict.
    async fn resolve_sample(
        &self,
        agent_id: &str,
        sample: &Sample,
        now: i64,
        summary: &mut IngestSummary,
    ) -> StorageResult<Result<NewPoint, String>> {
        if sample.metric_name.trim().is_empty() {
            return Ok(Err("empty metric_name".to_string()));
        }
        if sample.timestamp > now + MAX_FUTURE_SKEW_SECS {
            return Ok(Err(format!(
                "timestamp too far in future: {}",
                sample.timestamp
            )));
        }
        if !sample.value.is_finite() {
            return Ok(Err("non-finite value".to_string()));
        }

        let hint = match sample.value_kind_hint.as_deref() {
            None => None,
            Some("int") => Some(ValueKind::Integer),
            Some("float") => Some(ValueKind::Real),
            Some(other) => return Ok(Err(format!("unknown value_kind_hint: {other}"))),
        };

        if hint == Some(ValueKind::Integer) && !is_whole(sample.value) {
            return Ok(Err(format!(
                "value {} cannot be stored as integer",
                sample.value
            )));
        }

        let labels = Labels::from(sample.labels.clone());
        let creation_kind = hint.unwrap_or(if is_whole(sample.value) {
            ValueKind::Integer
        } else {
            ValueKind::Real
        });

        let (series_id, series_kind) = self
            .lookup_series(agent_id, &sample.metric_name, &labels, creation_kind, summary)
            .await?;

        // First sample fixed the kind; later samples must be representable
        // in it. A whole number fits either kind unless a hint forces the
        // disagreement.
        let value = match series_kind {
            ValueKind::Integer => {
                if hint == Some(ValueKind::Real) {
                    return Ok(Err(kind_mismatch(series_kind, "float-hinted sample")));
                }
                if !is_whole(sample.value) {
                    return Ok(Err(kind_mismatch(series_kind, "fractional value")));
                }
                PointValue::Int(sample.value as i64)
            }
            ValueKind::Real => {
                if hint == Some(ValueKind::Integer) {
                    return Ok(Err(kind_mismatch(series_kind, "int-hinted sample")));
                }
                PointValue::Float(sample.value)
            }
        };

        Ok(Ok(NewPoint {
            series_id,
            timestamp: sample.timestamp,
            value,
        }))
    }

    async fn lookup_series(
        &self,
        agent_id: &str,
        metric_name: &str,
        labels: &Labels,
        creation_kind: ValueKind,
        summary: &mut IngestSummary,
    ) -> StorageResult<(i64, ValueKind)> {
        let key = (
            agent_id.to_string(),
            metric_name.to_string(),
            labels.hash(),
        );

        if let Some(cached) = self.series_cache.read().await.get(&key) {
            return Ok(*cached);
        }

        let (series, created) = self
            .store
            .get_or_create_series(agent_id, metric_name, labels, creation_kind)
            .await?;
        if created {
            summary.series_created += 1;
        }

        let entry = (series.series_id, series.value_kind);
        self.series_cache.write().await.insert(key, entry);
        Ok(entry)
    }

    /// Drop cached entries for an agent (called on revocation).
    pub async fn evict_agent(&self, agent_id: &str) {
        self.series_cache
            .write()
            .await
            .retain(|(cached_agent, _, _), _| cached_agent != agent_id);
    }
}

fn is_whole(value: f64) -> bool {
    value.fract() == 0.0 && value.abs() <= MAX_SAFE_INT
}

fn kind_mismatch(series_kind: ValueKind, what: &str) -> String {
    format!("kind mismatch: series is {series_kind}, got {what}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::AgentRow;
    use std::collections::BTreeMap;

    async fn test_ingestor() -> (tempfile::TempDir, Ingestor, Arc<SqliteStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("test.db")).await.unwrap());
        store
            .insert_agent(&AgentRow {
                agent_id: "host01".to_string(),
                hostname: "host01".to_string(),
                public_key: "<PEM>".to_string(),
                bearer_token: "rw_test".to_string(),
                registered_at: 1_700_000_000,
                last_seen: None,
                status: "active".to_string(),
            })
            .await
            .unwrap();
        (dir, Ingestor::new(store.clone()), store)
    }

    fn sample(name: &str, value: f64, ts: i64) -> Sample {
        Sample {
            metric_name: name.to_string(),
            labels: BTreeMap::new(),
            value,
            timestamp: ts,
            value_kind_hint: None,
        }
    }

    fn batch(samples: Vec<Sample>) -> SampleBatch {
        SampleBatch {
            agent_id: "host01".to_string(),
            batch_timestamp: 1_700_000_100,
            samples,
            logs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_schema_less_discovery() {
        let (_dir, ingestor, store) = test_ingestor().await;

        let summary = ingestor
            .ingest(
                "host01",
                &batch(vec![
                    sample("cpu_usage_percent", 42.5, 1_700_000_100),
                    sample("memory_used_bytes", 8.0e9, 1_700_000_100),
                ]),
                1_700_000_101,
            )
            .await
            .unwrap();

        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.series_created, 2);
        assert_eq!(store.count_series().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejects_sample_but_not_batch() {
        let (_dir, ingestor, _store) = test_ingestor().await;

        // First sample fixes the series to real.
        ingestor
            .ingest(
                "host01",
                &batch(vec![sample("cpu_usage_percent", 42.5, 1_700_000_100)]),
                1_700_000_101,
            )
            .await
            .unwrap();

        let mut mismatched = sample("cpu_usage_percent", 43.0, 1_700_000_160);
        mismatched.value_kind_hint = Some("int".to_string());
        let fine = sample("cpu_usage_percent", 44.0, 1_700_000_160);

        let summary = ingestor
            .ingest("host01", &batch(vec![mismatched, fine]), 1_700_000_161)
            .await
            .unwrap();

        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.rejections[0].index, 0);
        assert!(summary.rejections[0].reason.contains("kind mismatch"));
    }

    #[tokio::test]
    async fn test_fractional_sample_on_integer_series_rejected() {
        let (_dir, ingestor, _store) = test_ingestor().await;

        ingestor
            .ingest(
                "host01",
                &batch(vec![sample("fs_used_bytes", 750.0, 1_700_000_100)]),
                1_700_000_101,
            )
            .await
            .unwrap();

        let summary = ingestor
            .ingest(
                "host01",
                &batch(vec![sample("fs_used_bytes", 750.5, 1_700_000_160)]),
                1_700_000_161,
            )
            .await
            .unwrap();

        assert_eq!(summary.rejected, 1);
    }

    #[tokio::test]
    async fn test_duplicate_batch_is_idempotent() {
        let (_dir, ingestor, store) = test_ingestor().await;
        let b = batch(vec![
            sample("cpu_usage_percent", 42.0, 1_700_000_100),
            sample("ipmi_temp_celsius", 55.0, 1_700_000_100),
        ]);

        ingestor.ingest("host01", &b, 1_700_000_101).await.unwrap();
        let second = ingestor.ingest("host01", &b, 1_700_000_102).await.unwrap();

        // Resubmission succeeds but storage keeps one copy of each point.
        assert_eq!(second.accepted, 2);
        let (ints, floats) = store.count_points().await.unwrap();
        assert_eq!(ints + floats, 2);
    }

    #[tokio::test]
    async fn test_future_timestamp_rejected() {
        let (_dir, ingestor, _store) = test_ingestor().await;
        let summary = ingestor
            .ingest(
                "host01",
                &batch(vec![sample("cpu_usage_percent", 1.0, 1_700_099_999)]),
                1_700_000_000,
            )
            .await
            .unwrap();
        assert_eq!(summary.rejected, 1);
        assert!(summary.rejections[0].reason.contains("future"));
    }

    #[tokio::test]
    async fn test_label_order_maps_to_same_series() {
        let (_dir, ingestor, store) = test_ingestor().await;

        let mut labels_a = BTreeMap::new();
        labels_a.insert("device".to_string(), "eth0".to_string());
        labels_a.insert("direction".to_string(), "rx".to_string());

        let mut s1 = sample("network_bytes_total", 1000.0, 1_700_000_100);
        s1.labels = labels_a.clone();
        let mut s2 = sample("network_bytes_total", 2000.0, 1_700_000_160);
        s2.labels = labels_a;

        let summary = ingestor
            .ingest("host01", &batch(vec![s1, s2]), 1_700_000_161)
            .await
            .unwrap();
        assert_eq!(summary.series_created, 1);
        assert_eq!(store.count_series().await.unwrap(), 1);
    }
}
