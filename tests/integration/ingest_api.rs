//! Ingestion endpoint behavior.

use rackwatch::{LogBatch, LogRecord, LogSource, Severity};
use serde_json::Value;

use super::helpers::{labelled, sample, TestServer};

#[tokio::test]
async fn test_ingest_and_latest_value() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let response = server
        .ingest(
            "host01",
            &bearer,
            vec![
                sample("cpu_usage_percent", 42.0, 1_700_000_100),
                labelled(
                    "ipmi_temp_celsius",
                    55.0,
                    1_700_000_100,
                    &[("sensor", "CPU Temp")],
                ),
            ],
        )
        .await;
    assert_eq!(response.status(), 200);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["accepted"], 2);
    assert_eq!(summary["rejected"], 0);
    assert_eq!(summary["series_created"], 2);

    let latest: Value = server
        .admin_get("/api/latest/ipmi_temp_celsius")
        .query(&[
            ("agent_id", "host01"),
            ("aggregation", "max"),
            ("labels", r#"[{"sensor": "CPU Temp"}]"#),
        ])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["value"], 55.0);
}

#[tokio::test]
async fn test_duplicate_submission_is_idempotent() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let samples = vec![
        sample("cpu_usage_percent", 42.0, 1_700_000_100),
        sample("memory_used_bytes", 8_000_000_000.0, 1_700_000_100),
    ];

    let first = server.ingest("host01", &bearer, samples.clone()).await;
    assert_eq!(first.status(), 200);
    let second = server.ingest("host01", &bearer, samples).await;
    assert_eq!(second.status(), 200);

    let (ints, floats) = server.store.count_points().await.unwrap();
    assert_eq!(ints + floats, 2);
}

#[tokio::test]
async fn test_agent_cannot_submit_for_another() {
    let server = TestServer::spawn().await;
    let bearer_a = server.register_agent("host01").await;
    server.register_agent("host02").await;

    // host01's token with host02's id in the batch.
    let response = server
        .ingest("host02", &bearer_a, vec![sample("cpu_usage_percent", 1.0, 1_700_000_100)])
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_missing_auth_rejected() {
    let server = TestServer::spawn().await;
    let batch = serde_json::json!({
        "agent_id": "host01",
        "batch_timestamp": 1_700_000_100,
        "samples": [],
    });
    let response = server
        .http
        .post(server.url("/api/metrics"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_kind_mismatch_partial_success() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    // Fixes fs_used_bytes to the integer kind.
    server
        .ingest("host01", &bearer, vec![sample("fs_used_bytes", 750.0, 1_700_000_100)])
        .await;

    let response = server
        .ingest(
            "host01",
            &bearer,
            vec![
                sample("fs_used_bytes", 800.5, 1_700_000_160),
                sample("fs_used_bytes", 900.0, 1_700_000_220),
            ],
        )
        .await;
    assert_eq!(response.status(), 200);

    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["accepted"], 1);
    assert_eq!(summary["rejected"], 1);
    assert_eq!(summary["rejections"][0]["index"], 0);
}

#[tokio::test]
async fn test_log_batch_ingestion() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let batch = LogBatch {
        agent_id: "host01".to_string(),
        entries: vec![
            LogRecord {
                source: LogSource::Kernel,
                timestamp: 1_700_000_050,
                severity: Severity::Error,
                message: "[12345.6] nvme0: controller reset".to_string(),
                context: None,
            },
            LogRecord {
                source: LogSource::Journal,
                timestamp: 1_700_000_060,
                severity: Severity::Warning,
                message: "[sshd.service] sshd[991]: failed login".to_string(),
                context: None,
            },
        ],
    };

    let response = server
        .http
        .post(server.url("/api/logs"))
        .bearer_auth(&bearer)
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["inserted"], 2);
    assert_eq!(server.store.count_logs().await.unwrap(), 2);

    // Identical resubmission appends again: log ingestion is append-only.
    let response = server
        .http
        .post(server.url("/api/logs"))
        .bearer_auth(&bearer)
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(server.store.count_logs().await.unwrap(), 4);

    // Stored as-is; severity filtering happens at query time.
    let errors_only = server
        .store
        .logs_for_agent(
            "host01",
            1_700_000_000,
            1_700_000_100,
            Some(Severity::Error.as_i64()),
            100,
        )
        .await
        .unwrap();
    assert_eq!(errors_only.len(), 2);
    assert!(errors_only.iter().all(|l| l.source == "kernel"));
}

#[tokio::test]
async fn test_stats_reflect_ingestion() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    server
        .ingest(
            "host01",
            &bearer,
            vec![
                sample("cpu_usage_percent", 42.5, 1_700_000_100),
                sample("memory_used_bytes", 1024.0, 1_700_000_100),
            ],
        )
        .await;

    let stats: Value = server
        .admin_get("/api/stats")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(stats["agents"]["total"], 1);
    assert_eq!(stats["series"], 2);
    let points = stats["points"]["int"].as_i64().unwrap() + stats["points"]["float"].as_i64().unwrap();
    assert_eq!(points, 2);
}
