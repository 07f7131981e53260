//! Retention behavior end to end.

use std::sync::Arc;
use std::time::Duration;

use rackwatch::retention::{RetentionPolicy, RetentionTask};
use rackwatch::storage::{AgentRow, NewPoint, PointValue, SqliteStore, ValueKind};
use rackwatch::{Labels, LogRecord, LogSource, Severity};

async fn seeded() -> (tempfile::TempDir, Arc<SqliteStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("test.db")).await.unwrap());
    store
        .insert_agent(&AgentRow {
            agent_id: "host01".to_string(),
            hostname: "host01".to_string(),
            public_key: "<PEM>".to_string(),
            bearer_token: "rw_host01".to_string(),
            registered_at: 0,
            last_seen: Some(0),
            status: "active".to_string(),
        })
        .await
        .unwrap();
    (dir, store)
}

fn task(store: Arc<SqliteStore>) -> RetentionTask {
    RetentionTask::new(
        store,
        RetentionPolicy {
            metrics_retention_days: 7,
            logs_retention_days: 3,
            interval: Duration::from_secs(300),
        },
    )
}

fn log(ts: i64) -> LogRecord {
    LogRecord {
        source: LogSource::Syslog,
        timestamp: ts,
        severity: Severity::Error,
        message: "disk error".to_string(),
        context: None,
    }
}

#[tokio::test]
async fn test_retention_windows_differ_per_kind() {
    let (_dir, store) = seeded().await;
    let now = 1_700_000_000;

    let (series, _) = store
        .get_or_create_series("host01", "cpu_usage_percent", &Labels::new(), ValueKind::Real)
        .await
        .unwrap();

    store
        .insert_points(
            &[
                NewPoint {
                    series_id: series.series_id,
                    timestamp: now - 8 * 86_400, // past metric retention
                    value: PointValue::Float(1.0),
                },
                NewPoint {
                    series_id: series.series_id,
                    timestamp: now - 86_400, // inside
                    value: PointValue::Float(2.0),
                },
            ],
            now,
        )
        .await
        .unwrap();

    store
        .insert_logs(
            "host01",
            &[log(now - 4 * 86_400), log(now - 3600)],
            now,
        )
        .await
        .unwrap();

    let outcome = task(store.clone()).sweep(now).await.unwrap().unwrap();
    assert_eq!(outcome.points_deleted, 1);
    assert_eq!(outcome.logs_deleted, 1);

    let (_, floats) = store.count_points().await.unwrap();
    assert_eq!(floats, 1);
    assert_eq!(store.count_logs().await.unwrap(), 1);
}

#[tokio::test]
async fn test_sweep_twice_equals_sweep_once() {
    let (_dir, store) = seeded().await;
    let now = 1_700_000_000;

    let (series, _) = store
        .get_or_create_series("host01", "fs_used_bytes", &Labels::new(), ValueKind::Integer)
        .await
        .unwrap();
    store
        .insert_points(
            &[
                NewPoint {
                    series_id: series.series_id,
                    timestamp: now - 30 * 86_400,
                    value: PointValue::Int(1),
                },
                NewPoint {
                    series_id: series.series_id,
                    timestamp: now - 10,
                    value: PointValue::Int(2),
                },
            ],
            now,
        )
        .await
        .unwrap();
    store.insert_logs("host01", &[log(now - 10)], now).await.unwrap();

    let sweep = task(store.clone());
    sweep.sweep(now).await.unwrap().unwrap();

    let points_after_first = store.count_points().await.unwrap();
    let logs_after_first = store.count_logs().await.unwrap();
    let series_after_first = store.count_series().await.unwrap();

    let outcome = sweep.sweep(now).await.unwrap().unwrap();
    assert_eq!(outcome.points_deleted, 0);
    assert_eq!(outcome.logs_deleted, 0);
    assert_eq!(outcome.series_swept, 0);

    assert_eq!(store.count_points().await.unwrap(), points_after_first);
    assert_eq!(store.count_logs().await.unwrap(), logs_after_first);
    assert_eq!(store.count_series().await.unwrap(), series_after_first);
}

#[tokio::test]
async fn test_overdue_commands_expire_and_age_out() {
    let (_dir, store) = seeded().await;
    let now = 1_700_000_000;

    // TTL of 60 s, created 10 minutes ago: overdue.
    let cmd = store
        .create_command("host01", "fan_control", "{}", now - 600, 60)
        .await
        .unwrap();

    let outcome = task(store.clone()).sweep(now).await.unwrap().unwrap();
    assert_eq!(outcome.commands_expired, 1);

    let stored = store.get_command(cmd.command_id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "expired");

    // Once past the grace window, the terminal command row is deleted.
    let later = now + 8 * 86_400;
    let outcome = task(store.clone()).sweep(later).await.unwrap().unwrap();
    assert_eq!(outcome.commands_deleted, 1);
    assert!(store.get_command(cmd.command_id).await.unwrap().is_none());
}
