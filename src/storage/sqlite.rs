//! SQLite datastore.
//!
//! Single-file embedded store shared by every subsystem. Tuned the same
//! way for agents in the tens-to-hundreds range: WAL journal for readers
//! during writes, NORMAL synchronous, 30 s busy timeout, small pool.
//!
//! Concurrency discipline:
//! - series creation races are serialized by the
//!   `UNIQUE(agent_id, metric_name, labels_hash)` constraint; the loser
//!   re-selects (no application-level mutex)
//! - duplicate points are dropped by `ON CONFLICT DO NOTHING`
//!   (first-writer wins), which makes client retries idempotent
//! - command transitions are single conditional UPDATEs guarded on the
//!   previous status set

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::error::{StorageError, StorageResult};
use super::schema::{
    AgentRow, CommandRow, LogRow, NewPoint, PointRow, PointValue, SeriesRow, StoreStats, ValueKind,
};
use crate::commands::CommandStatus;
use crate::{LogRecord, Labels};

/// Agents seen within this window count as active.
const ACTIVE_WINDOW_SECS: i64 = 3600;

pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (creating if missing) and migrate the datastore.
    #[instrument(skip_all)]
    pub async fn open(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("opening datastore at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running schema migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("datastore ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    pub async fn close(&self) {
        info!("closing datastore");
        self.pool.close().await;
    }

    /// Lightweight liveness probe for `/health`.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    // ========================================================================
    // Agents
    // ========================================================================

    #[instrument(skip(self, row), fields(agent_id = %row.agent_id))]
    pub async fn insert_agent(&self, row: &AgentRow) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO agents (agent_id, hostname, public_key, bearer_token, registered_at, last_seen, status)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.agent_id)
        .bind(&row.hostname)
        .bind(&row.public_key)
        .bind(&row.bearer_token)
        .bind(row.registered_at)
        .bind(row.last_seen)
        .bind(&row.status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_agent(&self, agent_id: &str) -> StorageResult<Option<AgentRow>> {
        let row = sqlx::query(
            r#"
            SELECT agent_id, hostname, public_key, bearer_token, registered_at, last_seen, status
            FROM agents WHERE agent_id = ?
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::agent_from_row))
    }

    /// All `(bearer_token, agent_id)` pairs. The auth layer compares the
    /// presented token against every stored one in constant time, never
    /// by indexed equality lookup.
    pub async fn list_agent_tokens(&self) -> StorageResult<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT bearer_token, agent_id FROM agents WHERE status = 'active'")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("bearer_token"), r.get("agent_id")))
            .collect())
    }

    pub async fn list_agents(&self) -> StorageResult<Vec<AgentRow>> {
        let rows = sqlx::query(
            r#"
            SELECT agent_id, hostname, public_key, bearer_token, registered_at, last_seen, status
            FROM agents ORDER BY last_seen DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Self::agent_from_row).collect())
    }

    pub async fn touch_last_seen(&self, agent_id: &str, now: i64) -> StorageResult<()> {
        sqlx::query("UPDATE agents SET last_seen = ? WHERE agent_id = ?")
            .bind(now)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Revocation: removes the agent and, via foreign keys, everything it
    /// owns (series, points, logs, commands).
    #[instrument(skip(self))]
    pub async fn delete_agent(&self, agent_id: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE agent_id = ?")
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    fn agent_from_row(row: sqlx::sqlite::SqliteRow) -> AgentRow {
        AgentRow {
            agent_id: row.get("agent_id"),
            hostname: row.get("hostname"),
            public_key: row.get("public_key"),
            bearer_token: row.get("bearer_token"),
            registered_at: row.get("registered_at"),
            last_seen: row.get("last_seen"),
            status: row.get("status"),
        }
    }

    // ========================================================================
    // Series catalog
    // ========================================================================

    pub async fn find_series(
        &self,
        agent_id: &str,
        metric_name: &str,
        labels_hash: &str,
    ) -> StorageResult<Option<SeriesRow>> {
        let row = sqlx::query(
            r#"
            SELECT series_id, agent_id, metric_name, labels_canonical, labels_hash, value_kind
            FROM metric_series
            WHERE agent_id = ? AND metric_name = ? AND labels_hash = ?
            "#,
        )
        .bind(agent_id)
        .bind(metric_name)
        .bind(labels_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::series_from_row).transpose()
    }

    /// Find or create the series for `(agent, metric, labels)`.
    ///
    /// Returns the row and whether it was created. Two concurrent ingests
    /// for an unseen triple may both attempt the insert; the UNIQUE
    /// constraint serializes them and the loser re-selects.
    pub async fn get_or_create_series(
        &self,
        agent_id: &str,
        metric_name: &str,
        labels: &Labels,
        kind: ValueKind,
    ) -> StorageResult<(SeriesRow, bool)> {
        let labels_hash = labels.hash();

        if let Some(existing) = self.find_series(agent_id, metric_name, &labels_hash).await? {
            return Ok((existing, false));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO metric_series (agent_id, metric_name, labels_canonical, labels_hash, value_kind)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (agent_id, metric_name, labels_hash) DO NOTHING
            "#,
        )
        .bind(agent_id)
        .bind(metric_name)
        .bind(labels.canonical())
        .bind(&labels_hash)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        let created = inserted.rows_affected() > 0;

        match self.find_series(agent_id, metric_name, &labels_hash).await? {
            Some(series) => Ok((series, created)),
            None => Err(StorageError::QueryFailed(
                "series vanished after insert".to_string(),
            )),
        }
    }

    /// Candidate series for a set of metric names, optionally restricted to
    /// specific agents or to agents seen within the last hour.
    pub async fn series_for_metrics(
        &self,
        metric_names: &[String],
        agent_ids: Option<&[String]>,
        active_only_now: Option<i64>,
    ) -> StorageResult<Vec<SeriesRow>> {
        if metric_names.is_empty() {
            return Ok(Vec::new());
        }

        let metric_ph = placeholders(metric_names.len());
        let mut sql = format!(
            r#"
            SELECT s.series_id, s.agent_id, s.metric_name, s.labels_canonical, s.labels_hash, s.value_kind
            FROM metric_series s
            JOIN agents a ON a.agent_id = s.agent_id
            WHERE s.metric_name IN ({metric_ph})
            "#,
        );

        if let Some(ids) = agent_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND s.agent_id IN ({})", placeholders(ids.len())));
        } else if active_only_now.is_some() {
            sql.push_str(" AND a.last_seen IS NOT NULL AND a.last_seen >= ?");
        }

        let mut query = sqlx::query(&sql);
        for name in metric_names {
            query = query.bind(name);
        }
        match (agent_ids, active_only_now) {
            (Some(ids), _) => {
                for id in ids {
                    query = query.bind(id);
                }
            }
            (None, Some(now)) => {
                query = query.bind(now - ACTIVE_WINDOW_SECS);
            }
            (None, None) => {}
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::series_from_row).collect()
    }

    pub async fn series_for_agent(
        &self,
        agent_id: &str,
        metric_names: &[String],
    ) -> StorageResult<Vec<SeriesRow>> {
        if metric_names.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT series_id, agent_id, metric_name, labels_canonical, labels_hash, value_kind
            FROM metric_series
            WHERE agent_id = ? AND metric_name IN ({})
            "#,
            placeholders(metric_names.len())
        );

        let mut query = sqlx::query(&sql).bind(agent_id);
        for name in metric_names {
            query = query.bind(name);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::series_from_row).collect()
    }

    pub async fn count_series(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metric_series")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    fn series_from_row(row: sqlx::sqlite::SqliteRow) -> StorageResult<SeriesRow> {
        let kind_str: String = row.get("value_kind");
        let value_kind = ValueKind::parse(&kind_str)
            .ok_or_else(|| StorageError::DecodeError(format!("unknown value_kind: {kind_str}")))?;

        Ok(SeriesRow {
            series_id: row.get("series_id"),
            agent_id: row.get("agent_id"),
            metric_name: row.get("metric_name"),
            labels_canonical: row.get("labels_canonical"),
            labels_hash: row.get("labels_hash"),
            value_kind,
        })
    }

    // ========================================================================
    // Points
    // ========================================================================

    /// Append a batch of points inside one transaction.
    ///
    /// Duplicate `(series_id, timestamp)` pairs are dropped silently.
    /// Returns how many rows were actually inserted.
    #[instrument(skip(self, points), fields(count = points.len()))]
    pub async fn insert_points(&self, points: &[NewPoint], sent_at: i64) -> StorageResult<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for point in points {
            let result = match point.value {
                PointValue::Int(v) => {
                    sqlx::query(
                        r#"
                        INSERT INTO metric_points_int (series_id, timestamp, sent_at, value)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT (series_id, timestamp) DO NOTHING
                        "#,
                    )
                    .bind(point.series_id)
                    .bind(point.timestamp)
                    .bind(sent_at)
                    .bind(v)
                    .execute(&mut *tx)
                    .await?
                }
                PointValue::Float(v) => {
                    sqlx::query(
                        r#"
                        INSERT INTO metric_points_float (series_id, timestamp, sent_at, value)
                        VALUES (?, ?, ?, ?)
                        ON CONFLICT (series_id, timestamp) DO NOTHING
                        "#,
                    )
                    .bind(point.series_id)
                    .bind(point.timestamp)
                    .bind(sent_at)
                    .bind(v)
                    .execute(&mut *tx)
                    .await?
                }
            };
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!("inserted {} of {} points", inserted, points.len());
        Ok(inserted)
    }

    /// All points for `series` in `[start, end]`, merged across both
    /// physical tables, sorted ascending by timestamp.
    ///
    /// One SQL statement per table regardless of how many series match.
    pub async fn points_in_range(
        &self,
        series: &[SeriesRow],
        start: i64,
        end: i64,
    ) -> StorageResult<Vec<PointRow>> {
        let (int_ids, float_ids) = split_by_kind(series);
        let mut points = Vec::new();

        if !int_ids.is_empty() {
            let sql = format!(
                "SELECT series_id, timestamp, value FROM metric_points_int \
                 WHERE series_id IN ({}) AND timestamp >= ? AND timestamp <= ?",
                placeholders(int_ids.len())
            );
            let mut query = sqlx::query(&sql);
            for id in &int_ids {
                query = query.bind(id);
            }
            let rows = query.bind(start).bind(end).fetch_all(&self.pool).await?;
            points.extend(rows.into_iter().map(|r| PointRow {
                series_id: r.get("series_id"),
                timestamp: r.get("timestamp"),
                value: PointValue::Int(r.get("value")),
            }));
        }

        if !float_ids.is_empty() {
            let sql = format!(
                "SELECT series_id, timestamp, value FROM metric_points_float \
                 WHERE series_id IN ({}) AND timestamp >= ? AND timestamp <= ?",
                placeholders(float_ids.len())
            );
            let mut query = sqlx::query(&sql);
            for id in &float_ids {
                query = query.bind(id);
            }
            let rows = query.bind(start).bind(end).fetch_all(&self.pool).await?;
            points.extend(rows.into_iter().map(|r| PointRow {
                series_id: r.get("series_id"),
                timestamp: r.get("timestamp"),
                value: PointValue::Float(r.get("value")),
            }));
        }

        points.sort_by_key(|p| (p.series_id, p.timestamp));
        Ok(points)
    }

    /// Newest point per series, one SQL statement per physical table.
    pub async fn latest_points(&self, series: &[SeriesRow]) -> StorageResult<Vec<PointRow>> {
        let (int_ids, float_ids) = split_by_kind(series);
        let mut points = Vec::new();

        if !int_ids.is_empty() {
            // SQLite returns the bare `value` column from the row that
            // supplied MAX(timestamp) within each group.
            let sql = format!(
                "SELECT series_id, MAX(timestamp) AS timestamp, value FROM metric_points_int \
                 WHERE series_id IN ({}) GROUP BY series_id",
                placeholders(int_ids.len())
            );
            let mut query = sqlx::query(&sql);
            for id in &int_ids {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            points.extend(rows.into_iter().map(|r| PointRow {
                series_id: r.get("series_id"),
                timestamp: r.get("timestamp"),
                value: PointValue::Int(r.get("value")),
            }));
        }

        if !float_ids.is_empty() {
            let sql = format!(
                "SELECT series_id, MAX(timestamp) AS timestamp, value FROM metric_points_float \
                 WHERE series_id IN ({}) GROUP BY series_id",
                placeholders(float_ids.len())
            );
            let mut query = sqlx::query(&sql);
            for id in &float_ids {
                query = query.bind(id);
            }
            let rows = query.fetch_all(&self.pool).await?;
            points.extend(rows.into_iter().map(|r| PointRow {
                series_id: r.get("series_id"),
                timestamp: r.get("timestamp"),
                value: PointValue::Float(r.get("value")),
            }));
        }

        Ok(points)
    }

    pub async fn count_points(&self) -> StorageResult<(i64, i64)> {
        let ints: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metric_points_int")
            .fetch_one(&self.pool)
            .await?;
        let floats: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM metric_points_float")
            .fetch_one(&self.pool)
            .await?;
        Ok((ints.0, floats.0))
    }

    // ========================================================================
    // Logs
    // ========================================================================

    /// Append-only; identical-looking lines are distinct events.
    #[instrument(skip(self, entries), fields(agent_id, count = entries.len()))]
    pub async fn insert_logs(
        &self,
        agent_id: &str,
        entries: &[LogRecord],
        received_at: i64,
    ) -> StorageResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        for entry in entries {
            let context = entry
                .context
                .as_ref()
                .and_then(|c| serde_json::to_string(c).ok());

            sqlx::query(
                r#"
                INSERT INTO log_entries (agent_id, source, timestamp, received_at, severity, message, context)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(agent_id)
            .bind(entry.source.as_str())
            .bind(entry.timestamp)
            .bind(received_at)
            .bind(entry.severity.as_i64())
            .bind(&entry.message)
            .bind(context)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entries.len())
    }

    pub async fn logs_for_agent(
        &self,
        agent_id: &str,
        start: i64,
        end: i64,
        min_severity: Option<i64>,
        limit: i64,
    ) -> StorageResult<Vec<LogRow>> {
        let mut sql = String::from(
            "SELECT entry_id, agent_id, source, timestamp, received_at, severity, message, context \
             FROM log_entries WHERE agent_id = ? AND timestamp >= ? AND timestamp <= ?",
        );
        if min_severity.is_some() {
            sql.push_str(" AND severity >= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(agent_id).bind(start).bind(end);
        if let Some(min) = min_severity {
            query = query.bind(min);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| LogRow {
                entry_id: r.get("entry_id"),
                agent_id: r.get("agent_id"),
                source: r.get("source"),
                timestamp: r.get("timestamp"),
                received_at: r.get("received_at"),
                severity: r.get("severity"),
                message: r.get("message"),
                context: r.get("context"),
            })
            .collect())
    }

    pub async fn count_logs(&self) -> StorageResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM log_entries")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    #[instrument(skip(self, payload))]
    pub async fn create_command(
        &self,
        agent_id: &str,
        command_type: &str,
        payload: &str,
        now: i64,
        ttl_sec: i64,
    ) -> StorageResult<CommandRow> {
        let result = sqlx::query(
            r#"
            INSERT INTO commands (agent_id, command_type, payload, status, created_at, expires_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(agent_id)
        .bind(command_type)
        .bind(payload)
        .bind(now)
        .bind(now + ttl_sec)
        .execute(&self.pool)
        .await?;

        let command_id = result.last_insert_rowid();
        self.get_command(command_id)
            .await?
            .ok_or_else(|| StorageError::QueryFailed("command vanished after insert".to_string()))
    }

    pub async fn get_command(&self, command_id: i64) -> StorageResult<Option<CommandRow>> {
        let row = sqlx::query(
            r#"
            SELECT command_id, agent_id, command_type, payload, status, created_at,
                   delivered_at, completed_at, expires_at, result, error
            FROM commands WHERE command_id = ?
            "#,
        )
        .bind(command_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::command_from_row).transpose()
    }

    /// Read-only view of an agent's pending queue (admin peek).
    pub async fn pending_commands(&self, agent_id: &str) -> StorageResult<Vec<CommandRow>> {
        let rows = sqlx::query(
            r#"
            SELECT command_id, agent_id, command_type, payload, status, created_at,
                   delivered_at, completed_at, expires_at, result, error
            FROM commands
            WHERE agent_id = ? AND status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::command_from_row).collect()
    }

    /// Atomically return and mark as delivered all pending commands for an
    /// agent, FIFO by `created_at`.
    #[instrument(skip(self))]
    pub async fn take_pending_commands(
        &self,
        agent_id: &str,
        now: i64,
    ) -> StorageResult<Vec<CommandRow>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT command_id, agent_id, command_type, payload, status, created_at,
                   delivered_at, completed_at, expires_at, result, error
            FROM commands
            WHERE agent_id = ? AND status = 'pending'
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut commands = Vec::with_capacity(rows.len());
        for row in rows {
            let mut command = Self::command_from_row(row)?;

            let updated = sqlx::query(
                "UPDATE commands SET status = 'delivered', delivered_at = ? \
                 WHERE command_id = ? AND status = 'pending'",
            )
            .bind(now)
            .bind(command.command_id)
            .execute(&mut *tx)
            .await?;

            // A concurrent delivery (stream push) may have won; skip those.
            if updated.rows_affected() > 0 {
                command.status = CommandStatus::Delivered;
                command.delivered_at = Some(now);
                commands.push(command);
            }
        }

        tx.commit().await?;
        Ok(commands)
    }

    /// Stream-push delivery marker for a single command.
    pub async fn mark_delivered(&self, command_id: i64, now: i64) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'delivered', delivered_at = ? \
             WHERE command_id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(command_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Optional intermediate transition while the agent works.
    pub async fn mark_executing(&self, command_id: i64, agent_id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'executing' \
             WHERE command_id = ? AND agent_id = ? AND status = 'delivered'",
        )
        .bind(command_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminalize a command with the agent's result. Only the addressed
    /// agent may transition it, and only out of delivered/executing.
    #[instrument(skip(self, result, error))]
    pub async fn settle_command(
        &self,
        command_id: i64,
        agent_id: &str,
        status: CommandStatus,
        result: Option<&str>,
        error: Option<&str>,
        now: i64,
    ) -> StorageResult<bool> {
        debug_assert!(matches!(
            status,
            CommandStatus::Completed | CommandStatus::Failed
        ));

        let updated = sqlx::query(
            r#"
            UPDATE commands SET status = ?, result = ?, error = ?, completed_at = ?
            WHERE command_id = ? AND agent_id = ? AND status IN ('delivered', 'executing')
            "#,
        )
        .bind(status.as_str())
        .bind(result)
        .bind(error)
        .bind(now)
        .bind(command_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    /// Elapse overdue pending/delivered commands to `expired`.
    pub async fn expire_overdue_commands(&self, now: i64) -> StorageResult<usize> {
        let result = sqlx::query(
            "UPDATE commands SET status = 'expired', completed_at = ? \
             WHERE status IN ('pending', 'delivered') AND expires_at < ?",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn delete_terminal_commands_before(&self, cutoff: i64) -> StorageResult<usize> {
        let result = sqlx::query(
            "DELETE FROM commands \
             WHERE status IN ('completed', 'failed', 'expired') AND created_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    fn command_from_row(row: sqlx::sqlite::SqliteRow) -> StorageResult<CommandRow> {
        let status_str: String = row.get("status");
        let status = CommandStatus::parse(&status_str).ok_or_else(|| {
            StorageError::DecodeError(format!("unknown command status: {status_str}"))
        })?;

        Ok(CommandRow {
            command_id: row.get("command_id"),
            agent_id: row.get("agent_id"),
            command_type: row.get("command_type"),
            payload: row.get("payload"),
            status,
            created_at: row.get("created_at"),
            delivered_at: row.get("delivered_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
            result: row.get("result"),
            error: row.get("error"),
        })
    }

    // ========================================================================
    // Retention
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn delete_points_before(&self, cutoff: i64) -> StorageResult<(usize, usize)> {
        let ints = sqlx::query("DELETE FROM metric_points_int WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        let floats = sqlx::query("DELETE FROM metric_points_float WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok((
            ints.rows_affected() as usize,
            floats.rows_affected() as usize,
        ))
    }

    #[instrument(skip(self))]
    pub async fn delete_logs_before(&self, cutoff: i64) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM log_entries WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Sweep catalog entries whose points have all expired.
    pub async fn delete_empty_series(&self) -> StorageResult<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM metric_series
            WHERE series_id NOT IN (SELECT DISTINCT series_id FROM metric_points_int)
              AND series_id NOT IN (SELECT DISTINCT series_id FROM metric_points_float)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    // ========================================================================
    // Leases
    // ========================================================================

    /// Acquire (or re-acquire) a named single-writer lease.
    ///
    /// Succeeds when the lease is free, expired, or already held by
    /// `holder`; a live lease held elsewhere makes this a no-op false.
    pub async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl_sec: i64,
        now: i64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO leases (name, holder, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET holder = excluded.holder, expires_at = excluded.expires_at
            WHERE leases.expires_at < ? OR leases.holder = excluded.holder
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(now + ttl_sec)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn release_lease(&self, name: &str, holder: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM leases WHERE name = ? AND holder = ?")
            .bind(name)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub async fn stats(&self, now: i64) -> StorageResult<StoreStats> {
        let agents_total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM agents")
            .fetch_one(&self.pool)
            .await?;
        let agents_active: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM agents WHERE last_seen > ?")
                .bind(now - ACTIVE_WINDOW_SECS)
                .fetch_one(&self.pool)
                .await?;
        let series_total = self.count_series().await?;
        let (points_int, points_float) = self.count_points().await?;
        let log_entries = self.count_logs().await?;
        let commands_pending: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM commands WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreStats {
            agents_total: agents_total.0,
            agents_active: agents_active.0,
            series_total,
            points_int,
            points_float,
            log_entries,
            commands_pending: commands_pending.0,
        })
    }

    /// Human-readable one-liner for logs.
    pub async fn describe(&self) -> String {
        let size_mb = std::fs::metadata(&self.db_path)
            .map(|m| m.len() as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        match self.count_points().await {
            Ok((ints, floats)) => format!(
                "sqlite: {} int + {} float points, {:.2} MB on disk",
                ints, floats, size_mb
            ),
            Err(e) => {
                warn!("stats query failed: {}", e);
                format!("sqlite: {:.2} MB on disk", size_mb)
            }
        }
    }
}

fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

fn split_by_kind(series: &[SeriesRow]) -> (Vec<i64>, Vec<i64>) {
    let mut int_ids = Vec::new();
    let mut float_ids = Vec::new();
    for s in series {
        match s.value_kind {
            ValueKind::Integer => int_ids.push(s.series_id),
            ValueKind::Real => float_ids.push(s.series_id),
        }
    }
    (int_ids, float_ids)
}
