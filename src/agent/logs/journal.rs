//! systemd journal collector.
//!
//! Reads `journalctl --output=json` starting from the stored journal
//! cursor and formats each entry as `[unit] identifier[pid]: message`.
//! The journal's own `__CURSOR` is the persisted position; PRIORITY maps
//! onto the 0..7 severity scale (journal numbering is inverted).

use std::process::Command;

use serde_json::{json, Value};

use crate::{LogContext, LogRecord, LogSource, Severity};

use super::LogCollector;

pub struct JournalLogCollector;

impl JournalLogCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for JournalLogCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCollector for JournalLogCollector {
    fn source(&self) -> LogSource {
        LogSource::Journal
    }

    fn available(&self) -> bool {
        Command::new("journalctl")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn collect(
        &mut self,
        cursor: Option<Value>,
        floor: Severity,
        history_size: usize,
    ) -> anyhow::Result<(Vec<LogRecord>, Value)> {
        let stored = cursor
            .as_ref()
            .and_then(|c| c.get("cursor"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut cmd = Command::new("journalctl");
        cmd.args(["--output=json", "--no-pager"]);
        match &stored {
            Some(position) => {
                cmd.args(["--after-cursor", position]);
            }
            None => {
                cmd.arg(format!("--lines={history_size}"));
            }
        }

        let output = cmd.output()?;
        if !output.status.success() {
            anyhow::bail!(
                "journalctl failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        let mut last_cursor = stored.clone().unwrap_or_default();

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<Value>(line) else {
                continue;
            };

            if let Some(c) = entry.get("__CURSOR").and_then(Value::as_str) {
                last_cursor = c.to_string();
            }

            if let Some(record) = record_from_entry(&entry, floor) {
                entries.push(record);
            }
        }

        Ok((entries, json!({ "cursor": last_cursor })))
    }
}

fn record_from_entry(entry: &Value, floor: Severity) -> Option<LogRecord> {
    let message = entry.get("MESSAGE").and_then(Value::as_str)?.trim();
    if message.is_empty() {
        return None;
    }

    // Realtime microseconds arrive as a decimal string.
    let usec: i64 = entry
        .get("__REALTIME_TIMESTAMP")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())?;
    let timestamp = usec / 1_000_000;

    let priority: u8 = entry
        .get("PRIORITY")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(6);
    let severity = Severity::from_journal_priority(priority);
    if severity < floor {
        return None;
    }

    let unit = entry
        .get("_SYSTEMD_UNIT")
        .or_else(|| entry.get("UNIT"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let identifier = entry
        .get("SYSLOG_IDENTIFIER")
        .and_then(Value::as_str)
        .map(str::to_string);
    let pid: Option<u32> = entry
        .get("_PID")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok());

    Some(LogRecord {
        source: LogSource::Journal,
        timestamp,
        severity,
        message: format_message(unit.as_deref(), identifier.as_deref(), pid, message),
        context: Some(LogContext {
            unit,
            identifier,
            pid,
        }),
    })
}

/// `[unit] identifier[pid]: message`, dropping absent parts.
fn format_message(
    unit: Option<&str>,
    identifier: Option<&str>,
    pid: Option<u32>,
    message: &str,
) -> String {
    let mut parts = Vec::new();
    if let Some(unit) = unit {
        parts.push(format!("[{unit}]"));
    }
    if let Some(identifier) = identifier {
        match pid {
            Some(pid) => parts.push(format!("{identifier}[{pid}]")),
            None => parts.push(identifier.to_string()),
        }
    }

    if parts.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", parts.join(" "), message)
    }
}
