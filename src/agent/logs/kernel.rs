//! Kernel ring buffer collector.
//!
//! `dmesg` lines carry a monotonic seconds-since-boot prefix
//! (`[12345.678901]`); the UTC timestamp is `boot_time + offset`, with
//! boot time read once from `/proc/stat` `btime`. Incremental collection
//! tracks the consumed line count; the ring buffer only ever appends
//! within one boot, and a reboot restarts the agent (and this cursor).

use std::process::Command;

use serde_json::{json, Value};

use crate::{LogRecord, LogSource, Severity};

use super::{parse_severity, LogCollector};

pub struct KernelLogCollector {
    boot_time: Option<i64>,
}

impl KernelLogCollector {
    pub fn new() -> Self {
        Self {
            boot_time: read_boot_time(),
        }
    }
}

impl Default for KernelLogCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl LogCollector for KernelLogCollector {
    fn source(&self) -> LogSource {
        LogSource::Kernel
    }

    fn available(&self) -> bool {
        self.boot_time.is_some()
            && Command::new("dmesg")
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
        let boot_time = self
            .boot_time
            .ok_or_else(|| anyhow::anyhow!("boot time unavailable"))?;

        let output = Command::new("dmesg").output()?;
        if !output.status.success() {
            anyhow::bail!("dmesg failed: {}", String::from_utf8_lossy(&output.stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let lines: Vec<&str> = stdout.lines().collect();
        let total_lines = lines.len();

        let consumed = cursor
            .as_ref()
            .and_then(|c| c.get("last_line"))
            .and_then(Value::as_u64)
            .map(|v| v as usize);

        let fresh: &[&str] = match consumed {
            // Incremental: everything past the consumed count.
            Some(n) if n < total_lines => &lines[n..],
            Some(_) => &[],
            // First run: bounded backfill.
            None => &lines[total_lines.saturating_sub(history_size)..],
        };

        let mut entries = Vec::new();
        for line in fresh {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let severity = parse_severity(line);
            if severity < floor {
                continue;
            }

            let Some(offset) = parse_monotonic_prefix(line) else {
                continue;
            };

            entries.push(LogRecord {
                source: LogSource::Kernel,
                timestamp: boot_time + offset as i64,
                severity,
                message: line.to_string(),
                context: None,
            });
        }

        let new_cursor = json!({ "last_line": total_lines });
        Ok((entries, new_cursor))
    }
}

/// Parse the leading `[ 123.456789]` into whole seconds since boot.
fn parse_monotonic_prefix(line: &str) -> Option<f64> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    rest[..close].trim().parse::<f64>().ok()
}

fn read_boot_time() -> Option<i64> {
    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    stat.lines()
        .find(|l| l.starts_with("btime"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}
