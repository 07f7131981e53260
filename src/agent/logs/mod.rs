//! Incremental log shipping.
//!
//! Every source keeps an opaque cursor persisted at
//! `auth_dir/log-cursors.<source>`. The runtime only writes the advanced
//! cursor after a successful ship, so a failed push is retried from the
//! same position on the next cycle. First runs backfill a bounded slice
//! of history for operator context.

pub mod journal;
pub mod kernel;
pub mod syslog;

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error};

use crate::config::LogShippingConfig;
use crate::{LogRecord, LogSource, Severity};

/// Contract for one log source.
pub trait LogCollector: Send + Sync {
    fn source(&self) -> LogSource;

    /// Checked once at startup; unavailable sources are skipped.
    fn available(&self) -> bool;

    /// Collect new entries past `cursor` (or a bounded backfill when the
    /// cursor is absent) and return them with the advanced cursor.
    fn collect(
        &mut self,
        cursor: Option<Value>,
        floor: Severity,
        history_size: usize,
    ) -> anyhow::Result<(Vec<LogRecord>, Value)>;
}

/// Per-source cursor files under the agent's auth directory.
pub struct CursorStore {
    auth_dir: PathBuf,
}

impl CursorStore {
    pub fn new(auth_dir: impl AsRef<Path>) -> Self {
        Self {
            auth_dir: auth_dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, source: LogSource) -> PathBuf {
        self.auth_dir.join(format!("log-cursors.{source}"))
    }

    pub fn load(&self, source: LogSource) -> Option<Value> {
        let raw = std::fs::read_to_string(self.path(source)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn save(&self, source: LogSource, cursor: &Value) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.auth_dir)?;
        std::fs::write(self.path(source), serde_json::to_string(cursor)?)?;
        Ok(())
    }
}

/// Instantiate the collectors enabled by config, dropping unavailable ones.
pub fn build_collectors(config: &LogShippingConfig) -> Vec<Box<dyn LogCollector>> {
    let mut collectors: Vec<Box<dyn LogCollector>> = Vec::new();
    if !config.enabled {
        return collectors;
    }

    for source in &config.sources {
        let collector: Box<dyn LogCollector> = match source.as_str() {
            "kernel" => Box::new(kernel::KernelLogCollector::new()),
            "journal" => Box::new(journal::JournalLogCollector::new()),
            "syslog" => Box::new(syslog::SyslogCollector::default()),
            other => {
                error!("unknown log source in config: {other}");
                continue;
            }
        };

        if collector.available() {
            collectors.push(collector);
        } else {
            debug!("log source {source} not available, skipping");
        }
    }

    collectors
}

/// Keyword heuristic for sources that carry no structured priority.
pub(crate) fn parse_severity(line: &str) -> Severity {
    let lower = line.to_lowercase();
    if ["error", "err", "fatal", "fail", "critical"]
        .iter()
        .any(|w| lower.contains(w))
    {
        Severity::Error
    } else if lower.contains("warn") {
        Severity::Warning
    } else if lower.contains("debug") {
        Severity::Debug
    } else {
        Severity::Info
    }
}
