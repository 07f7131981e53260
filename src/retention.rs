//! Periodic retention sweep.
//!
//! One ticker drives every piece of background maintenance: point
//! retention, log retention, the empty-series sweep, command TTL expiry,
//! and terminal-command cleanup. The whole pass runs under a named lease;
//! while a second server process (or a slow previous pass) holds it, the
//! invocation is a no-op. Sweep errors are logged and retried next tick;
//! they never take the process down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, instrument};

use crate::storage::SqliteStore;

const LEASE_NAME: &str = "retention_sweep";

/// Terminal commands are kept this long for admin readback.
const COMMAND_GRACE_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub metrics_retention_days: u32,
    pub logs_retention_days: u32,
    pub interval: Duration,
}

/// Accumulated counters, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepOutcome {
    pub points_deleted: usize,
    pub logs_deleted: usize,
    pub series_swept: usize,
    pub commands_expired: usize,
    pub commands_deleted: usize,
}

pub struct RetentionTask {
    store: Arc<SqliteStore>,
    policy: RetentionPolicy,
    /// Lease holder id; unique per process instance.
    holder: String,
}

impl RetentionTask {
    pub fn new(store: Arc<SqliteStore>, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            holder: format!("rackwatch-{}", std::process::id()),
        }
    }

    /// Run until the shutdown channel flips. Honors shutdown within one
    /// tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.policy.interval);
        // The immediate first tick doubles as the startup sweep.
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    match self.sweep(now).await {
                        Ok(Some(outcome)) => {
                            if outcome.points_deleted > 0
                                || outcome.logs_deleted > 0
                                || outcome.commands_expired > 0
                            {
                                info!(
                                    "sweep: {} points, {} logs, {} series, {} commands expired, {} commands deleted",
                                    outcome.points_deleted,
                                    outcome.logs_deleted,
                                    outcome.series_swept,
                                    outcome.commands_expired,
                                    outcome.commands_deleted,
                                );
                            }
                        }
                        Ok(None) => debug!("sweep skipped, lease held elsewhere"),
                        Err(e) => error!("retention sweep failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("retention task stopping");
                    break;
                }
            }
        }
    }

    /// One full pass. Returns `None` when the lease is held elsewhere.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: i64) -> anyhow::Result<Option<SweepOutcome>> {
        // Lease TTL covers a pathologically slow pass; re-entrant
        // invocations by the same holder renew instead of failing.
        let lease_ttl = (self.policy.interval.as_secs() as i64 * 2).max(600);
        if !self
            .store
            .acquire_lease(LEASE_NAME, &self.holder, lease_ttl, now)
            .await?
        {
            return Ok(None);
        }

        let mut outcome = SweepOutcome::default();

        let metrics_cutoff = now - self.policy.metrics_retention_days as i64 * 86_400;
        let (ints, floats) = self.store.delete_points_before(metrics_cutoff).await?;
        outcome.points_deleted = ints + floats;

        let logs_cutoff = now - self.policy.logs_retention_days as i64 * 86_400;
        outcome.logs_deleted = self.store.delete_logs_before(logs_cutoff).await?;

        outcome.series_swept = self.store.delete_empty_series().await?;

        outcome.commands_expired = self.store.expire_overdue_commands(now).await?;
        outcome.commands_deleted = self
            .store
            .delete_terminal_commands_before(now - COMMAND_GRACE_SECS)
            .await?;

        self.store.release_lease(LEASE_NAME, &self.holder).await?;

        Ok(Some(outcome))
    }
}
