//! The agent's task structure.
//!
//! Three cooperating tasks share one HTTP client:
//! - the collection loop drives exporters and ships samples + logs
//! - the poll loop fetches and executes pending commands
//! - the optional stream task mirrors the poll loop with push latency
//!
//! Push failures keep samples in a bounded outbound queue and back off
//! exponentially (1 s → 60 s); a 503's Retry-After is honored as the
//! floor for the next delay.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::commands::CommandEnvelope;
use crate::{LogBatch, LogRecord, Sample, SampleBatch};

use super::commands::CommandExecutor;
use super::exporters::{safe_collect, system::SystemExporter, MetricExporter};
use super::http::{AgentClient, Backoff, RequestError};
use super::logs::{build_collectors, CursorStore, LogCollector};
use super::stream::run_command_stream;

/// Outbound queue bound; beyond this the oldest samples are dropped.
const MAX_QUEUE: usize = 10_000;

pub struct AgentRuntime {
    config: AgentConfig,
    client: AgentClient,
    agent_id: String,
}

impl AgentRuntime {
    pub fn new(config: AgentConfig, client: AgentClient, agent_id: String) -> Self {
        Self {
            config,
            client,
            agent_id,
        }
    }

    /// Single collection cycle, for `--once` installer runs.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        let mut collect = CollectTask::new(&self.config, self.client.clone(), self.agent_id.clone());
        collect.cycle().await;
        if !collect.queue.is_empty() {
            anyhow::bail!("failed to ship {} samples", collect.queue.len());
        }
        Ok(())
    }

    /// Run until the shutdown channel flips.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut tasks = Vec::new();

        let collect = CollectTask::new(&self.config, self.client.clone(), self.agent_id.clone());
        let collect_interval = Duration::from_secs(self.config.interval_sec.max(1));
        let collect_shutdown = shutdown.clone();
        tasks.push(tokio::spawn(
            collect.run(collect_interval, collect_shutdown),
        ));

        let poll = PollTask {
            client: self.client.clone(),
            agent_id: self.agent_id.clone(),
            executor: CommandExecutor::new(),
        };
        // The server expects a poll at most 90 s apart.
        let poll_interval = Duration::from_secs(self.config.poll_interval_sec.clamp(1, 90));
        tasks.push(tokio::spawn(poll.run(poll_interval, shutdown.clone())));

        if self.config.command_stream {
            tasks.push(tokio::spawn(run_command_stream(
                self.client.clone(),
                CommandExecutor::new(),
                shutdown.clone(),
            )));
        }

        info!("agent running (id: {})", self.agent_id);
        for task in tasks {
            let _ = task.await;
        }
        info!("agent stopped");
    }
}

/// Exporter + log-shipping loop.
struct CollectTask {
    client: AgentClient,
    agent_id: String,
    exporters: Vec<Box<dyn MetricExporter>>,
    log_collectors: Vec<Box<dyn LogCollector>>,
    cursors: CursorStore,
    queue: VecDeque<Sample>,
    backoff: Backoff,
    severity_floor: crate::Severity,
    history_size: usize,
}

impl CollectTask {
    fn new(config: &AgentConfig, client: AgentClient, agent_id: String) -> Self {
        let mut exporters: Vec<Box<dyn MetricExporter>> = vec![Box::new(SystemExporter::new())];
        exporters.retain(|e| {
            let ok = e.available();
            if !ok {
                warn!("exporter {} unavailable, disabled", e.name());
            }
            ok
        });

        Self {
            exporters,
            log_collectors: build_collectors(&config.log_shipping),
            cursors: CursorStore::new(&config.auth_dir),
            client,
            agent_id,
            queue: VecDeque::new(),
            backoff: Backoff::default(),
            severity_floor: config.log_shipping.severity_floor,
            history_size: config.log_shipping.history_size,
        }
    }

    async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = shutdown.changed() => {
                    debug!("collect task stopping");
                    // Last-chance flush of whatever is queued.
                    self.push_samples().await;
                    break;
                }
            }
        }
    }

    async fn cycle(&mut self) {
        let now = chrono::Utc::now().timestamp();

        for exporter in &mut self.exporters {
            for sample in safe_collect(exporter.as_mut(), now) {
                if self.queue.len() >= MAX_QUEUE {
                    self.queue.pop_front();
                }
                self.queue.push_back(sample);
            }
        }

        self.push_samples().await;
        self.ship_logs().await;
    }

    async fn push_samples(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let samples: Vec<Sample> = self.queue.iter().cloned().collect();
        let batch = SampleBatch {
            agent_id: self.agent_id.clone(),
            batch_timestamp: chrono::Utc::now().timestamp(),
            samples,
            logs: Vec::new(),
        };

        match self
            .client
            .post_json::<_, Value>("/api/metrics", &batch)
            .await
        {
            Ok(summary) => {
                debug!("pushed {} samples: {summary}", batch.samples.len());
                self.queue.clear();
                self.backoff.reset();
            }
            Err(e) => {
                let floor = match &e {
                    RequestError::RetryAfter(d) => Some(*d),
                    _ => None,
                };
                let delay = self.backoff.next(floor);
                error!(
                    "metric push failed ({e}); {} samples queued, retrying in {}s",
                    self.queue.len(),
                    delay.as_secs()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Collect per source, ship, and persist cursors only after a
    /// successful ship so a failed push retries from the same position.
    async fn ship_logs(&mut self) {
        for i in 0..self.log_collectors.len() {
            let source = self.log_collectors[i].source();
            let cursor = self.cursors.load(source);
            let first_run = cursor.is_none();

            let (entries, new_cursor) =
                match self.log_collectors[i].collect(cursor, self.severity_floor, self.history_size) {
                    Ok(result) => result,
                    Err(e) => {
                        error!("log collection failed for {source}: {e:#}");
                        continue;
                    }
                };

            if first_run && !entries.is_empty() {
                info!("{source}: first run, backfilling {} entries", entries.len());
            }

            if entries.is_empty() {
                // Nothing to ship; advancing the cursor skips re-parsing.
                let _ = self.cursors.save(source, &new_cursor);
                continue;
            }

            let shipped = self.ship_log_batch(entries).await;
            if shipped {
                if let Err(e) = self.cursors.save(source, &new_cursor) {
                    error!("cursor persist failed for {source}: {e:#}");
                }
            }
        }
    }

    async fn ship_log_batch(&self, entries: Vec<LogRecord>) -> bool {
        let count = entries.len();
        let batch = LogBatch {
            agent_id: self.agent_id.clone(),
            entries,
        };
        match self.client.post_json::<_, Value>("/api/logs", &batch).await {
            Ok(_) => {
                debug!("shipped {count} log entries");
                true
            }
            Err(e) => {
                error!("log push failed ({e}); cursor retained for retry");
                false
            }
        }
    }
}

/// Pending-command poll + execute loop.
struct PollTask {
    client: AgentClient,
    agent_id: String,
    executor: CommandExecutor,
}

#[derive(serde::Deserialize)]
struct PollResponse {
    commands: Vec<CommandEnvelope>,
}

impl PollTask {
    async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                _ = shutdown.changed() => {
                    debug!("poll task stopping");
                    break;
                }
            }
        }
    }

    async fn cycle(&self) {
        let response: PollResponse = match self
            .client
            .get_json(&format!("/api/commands/{}", self.agent_id))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("command poll failed: {e}");
                return;
            }
        };

        for envelope in response.commands {
            let report = self.executor.execute(&envelope).await;
            if let Err(e) = self
                .client
                .post_json::<_, Value>("/api/command-results", &report)
                .await
            {
                error!(
                    "result submission for command {} failed: {e}",
                    envelope.command_id
                );
            }
        }
    }
}
