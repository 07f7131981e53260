//! Query engine semantics against a seeded store.

use std::sync::Arc;

use rackwatch::ingest::Ingestor;
use rackwatch::query::{
    fraction, latest_value, rate_timeseries, timeseries, Aggregation, LabelFilter, ValueSpec,
};
use rackwatch::storage::{AgentRow, SqliteStore};
use rackwatch::{Sample, SampleBatch};

async fn seeded() -> (tempfile::TempDir, Arc<SqliteStore>, Ingestor) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("test.db")).await.unwrap());
    for agent_id in ["host01", "host02"] {
        store
            .insert_agent(&AgentRow {
                agent_id: agent_id.to_string(),
                hostname: agent_id.to_string(),
                public_key: "<PEM>".to_string(),
                bearer_token: format!("rw_{agent_id}"),
                registered_at: 1_700_000_000,
                last_seen: Some(chrono::Utc::now().timestamp()),
                status: "active".to_string(),
            })
            .await
            .unwrap();
    }
    let ingestor = Ingestor::new(store.clone());
    (dir, store, ingestor)
}

fn sample(metric: &str, value: f64, ts: i64, labels: &[(&str, &str)]) -> Sample {
    Sample {
        metric_name: metric.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        value,
        timestamp: ts,
        value_kind_hint: None,
    }
}

async fn push(ingestor: &Ingestor, agent_id: &str, samples: Vec<Sample>) {
    let now = samples.iter().map(|s| s.timestamp).max().unwrap_or(0) + 1;
    let batch = SampleBatch {
        agent_id: agent_id.to_string(),
        batch_timestamp: now,
        samples,
        logs: Vec::new(),
    };
    let summary = ingestor.ingest(agent_id, &batch, now).await.unwrap();
    assert_eq!(summary.rejected, 0, "seed batch rejected: {:?}", summary.rejections);
}

fn names(metric: &str) -> Vec<String> {
    vec![metric.to_string()]
}

#[tokio::test]
async fn test_latest_value_reduces_newest_per_series() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("ipmi_temp_celsius", 55.0, 1_700_000_100, &[("sensor", "CPU Temp")]),
            sample("ipmi_temp_celsius", 48.0, 1_700_000_100, &[("sensor", "VRM Temp")]),
            // Older CPU reading; the newest per series wins.
            sample("ipmi_temp_celsius", 70.0, 1_700_000_040, &[("sensor", "CPU Temp")]),
        ],
    )
    .await;

    let filtered = latest_value(
        &store,
        "host01",
        &names("ipmi_temp_celsius"),
        &LabelFilter::parse(r#"[{"sensor": "CPU Temp"}]"#).unwrap(),
        Aggregation::Max,
    )
    .await
    .unwrap();
    assert_eq!(filtered, Some(55.0));

    let across_all = latest_value(
        &store,
        "host01",
        &names("ipmi_temp_celsius"),
        &LabelFilter::any(),
        Aggregation::Max,
    )
    .await
    .unwrap();
    assert_eq!(across_all, Some(55.0));

    let minimum = latest_value(
        &store,
        "host01",
        &names("ipmi_temp_celsius"),
        &LabelFilter::any(),
        Aggregation::Min,
    )
    .await
    .unwrap();
    assert_eq!(minimum, Some(48.0));
}

#[tokio::test]
async fn test_latest_value_is_a_fixed_point() {
    let (_dir, store, ingestor) = seeded().await;
    push(
        &ingestor,
        "host01",
        vec![sample("cpu_usage_percent", 42.5, 1_700_000_100, &[])],
    )
    .await;

    let first = latest_value(
        &store,
        "host01",
        &names("cpu_usage_percent"),
        &LabelFilter::any(),
        Aggregation::None,
    )
    .await
    .unwrap();
    let second = latest_value(
        &store,
        "host01",
        &names("cpu_usage_percent"),
        &LabelFilter::any(),
        Aggregation::None,
    )
    .await
    .unwrap();
    assert_eq!(first, second);
    assert_eq!(first, Some(42.5));
}

#[tokio::test]
async fn test_latest_value_missing_metric_is_none() {
    let (_dir, store, _ingestor) = seeded().await;
    let value = latest_value(
        &store,
        "host01",
        &names("gpu_power_watts"),
        &LabelFilter::any(),
        Aggregation::Max,
    )
    .await
    .unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_timeseries_round_trip_and_grouping() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("ipmi_temp_celsius", 50.0, 1_700_000_100, &[("sensor", "CPU Temp")]),
            sample("ipmi_temp_celsius", 60.0, 1_700_000_100, &[("sensor", "VRM Temp")]),
            sample("ipmi_temp_celsius", 52.0, 1_700_000_160, &[("sensor", "CPU Temp")]),
        ],
    )
    .await;
    push(
        &ingestor,
        "host02",
        vec![sample("ipmi_temp_celsius", 40.0, 1_700_000_100, &[("sensor", "CPU Temp")])],
    )
    .await;

    let data = timeseries(
        &store,
        &names("ipmi_temp_celsius"),
        1_700_000_000,
        1_700_000_200,
        None,
        &LabelFilter::any(),
        Aggregation::Max,
        None,
        None,
    )
    .await
    .unwrap();

    let host01 = &data["host01"];
    // Two sensors collapse to one line per timestamp.
    assert_eq!(host01.len(), 2);
    assert_eq!(host01[0].timestamp, 1_700_000_100);
    assert_eq!(host01[0].value, 60.0);
    assert_eq!(host01[1].timestamp, 1_700_000_160);
    assert_eq!(host01[1].value, 52.0);

    assert_eq!(data["host02"].len(), 1);
}

#[tokio::test]
async fn test_timeseries_unaggregated_keeps_every_point() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("ipmi_temp_celsius", 50.0, 1_700_000_100, &[("sensor", "CPU Temp")]),
            sample("ipmi_temp_celsius", 60.0, 1_700_000_100, &[("sensor", "VRM Temp")]),
        ],
    )
    .await;

    let data = timeseries(
        &store,
        &names("ipmi_temp_celsius"),
        1_700_000_000,
        1_700_000_200,
        None,
        &LabelFilter::any(),
        Aggregation::None,
        None,
        None,
    )
    .await
    .unwrap();

    // Round trip: every submitted point appears exactly once.
    assert_eq!(data["host01"].len(), 2);
}

#[tokio::test]
async fn test_timeseries_step_rebucketing() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("cpu_usage_percent", 10.5, 1_700_000_010, &[]),
            sample("cpu_usage_percent", 20.5, 1_700_000_050, &[]),
            sample("cpu_usage_percent", 30.5, 1_700_000_070, &[]),
        ],
    )
    .await;

    let data = timeseries(
        &store,
        &names("cpu_usage_percent"),
        1_700_000_000,
        1_700_000_100,
        None,
        &LabelFilter::any(),
        Aggregation::Max,
        Some(60),
        None,
    )
    .await
    .unwrap();

    // 1_700_000_010 buckets alone; 1_700_000_050 and 1_700_000_070 share
    // the next 60 s bucket and reduce to their max.
    let host01 = &data["host01"];
    assert_eq!(host01.len(), 2);
    assert_eq!(host01[0].timestamp, 1_699_999_980);
    assert_eq!(host01[0].value, 10.5);
    assert_eq!(host01[1].timestamp, 1_700_000_040);
    assert_eq!(host01[1].value, 30.5);
}

#[tokio::test]
async fn test_rate_over_counter_reset() {
    let (_dir, store, ingestor) = seeded().await;

    // Counter climbs 1000 → 3000, resets to 0, then reaches 500.
    push(
        &ingestor,
        "host01",
        vec![
            sample("network_receive_bytes_total", 1000.0, 100, &[("device", "eth0")]),
            sample("network_receive_bytes_total", 3000.0, 200, &[("device", "eth0")]),
            sample("network_receive_bytes_total", 0.0, 300, &[("device", "eth0")]),
            sample("network_receive_bytes_total", 500.0, 400, &[("device", "eth0")]),
        ],
    )
    .await;

    let data = rate_timeseries(
        &store,
        &names("network_receive_bytes_total"),
        0,
        400,
        None,
        &LabelFilter::any(),
        400,
        Aggregation::Sum,
        None,
    )
    .await
    .unwrap();

    let rates = &data["host01"];
    let at = |ts: i64| {
        rates
            .iter()
            .find(|p| p.timestamp == ts)
            .unwrap_or_else(|| panic!("no rate at {ts}"))
            .value
    };

    assert_eq!(at(200), 20.0);
    assert_eq!(at(300), 0.0);
    assert_eq!(at(400), 5.0);
    assert!(rates.iter().all(|p| p.value >= 0.0));
}

#[tokio::test]
async fn test_rate_sums_across_series() {
    let (_dir, store, ingestor) = seeded().await;

    // rx and tx both grow 1000 bytes per 100 s; summed rate is 20 B/s.
    push(
        &ingestor,
        "host01",
        vec![
            sample("network_receive_bytes_total", 0.0, 100, &[("device", "eth0")]),
            sample("network_receive_bytes_total", 1000.0, 200, &[("device", "eth0")]),
            sample("network_transmit_bytes_total", 0.0, 100, &[("device", "eth0")]),
            sample("network_transmit_bytes_total", 1000.0, 200, &[("device", "eth0")]),
        ],
    )
    .await;

    let data = rate_timeseries(
        &store,
        &[
            "network_receive_bytes_total".to_string(),
            "network_transmit_bytes_total".to_string(),
        ],
        0,
        300,
        None,
        &LabelFilter::any(),
        300,
        Aggregation::Sum,
        None,
    )
    .await
    .unwrap();

    let rates = &data["host01"];
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].timestamp, 200);
    assert_eq!(rates[0].value, 20.0);
}

#[tokio::test]
async fn test_fraction_disk_usage() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("fs_used_bytes", 750.0, 1_700_000_100, &[("mountpoint", "/")]),
            sample("fs_total_bytes", 1000.0, 1_700_000_100, &[("mountpoint", "/")]),
        ],
    )
    .await;

    let filter = LabelFilter::parse(r#"[{"mountpoint": "/"}]"#).unwrap();
    let used = ValueSpec::new("fs_used_bytes").with_filter(filter.clone());
    let total = ValueSpec::new("fs_total_bytes").with_filter(filter);

    let percent = fraction(&store, "host01", &used, &total, 100.0)
        .await
        .unwrap();
    assert_eq!(percent, Some(75.0));

    // Missing denominator metric: null, not an error.
    let absent = ValueSpec::new("fs_capacity_bytes");
    let none = fraction(&store, "host01", &used, &absent, 100.0)
        .await
        .unwrap();
    assert_eq!(none, None);
}

#[tokio::test]
async fn test_label_filter_disjunction_selects_series() {
    let (_dir, store, ingestor) = seeded().await;

    push(
        &ingestor,
        "host01",
        vec![
            sample("ipmi_temp_celsius", 55.0, 1_700_000_100, &[("sensor", "CPU Temp")]),
            sample("ipmi_temp_celsius", 65.0, 1_700_000_100, &[("sensor", "VRM Temp")]),
            sample("ipmi_temp_celsius", 30.0, 1_700_000_100, &[("sensor", "Inlet Temp")]),
        ],
    )
    .await;

    let filter =
        LabelFilter::parse(r#"[{"sensor": "CPU Temp"}, {"sensor": "VRM Temp"}]"#).unwrap();
    let value = latest_value(
        &store,
        "host01",
        &names("ipmi_temp_celsius"),
        &filter,
        Aggregation::Max,
    )
    .await
    .unwrap();
    assert_eq!(value, Some(65.0));
}
