//! Syslog file collector.
//!
//! Tracks `(inode, byte_offset)`. An inode change means rotation, a
//! shrinking file means truncation; both reset the offset to zero. Line
//! timestamps use the classic local-time `%b %e %H:%M:%S` prefix and are
//! converted to UTC with the agent's local offset.

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use chrono::{Datelike, Local, NaiveDate, TimeZone};
use serde_json::{json, Value};

use crate::{LogRecord, LogSource, Severity};

use super::{parse_severity, LogCollector};

const DEFAULT_SYSLOG_PATH: &str = "/var/log/syslog";

pub struct SyslogCollector {
    path: PathBuf,
}

impl SyslogCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SyslogCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SYSLOG_PATH)
    }
}

impl LogCollector for SyslogCollector {
    fn source(&self) -> LogSource {
        LogSource::Syslog
    }

    fn available(&self) -> bool {
        self.path.exists()
    }

    fn collect(
        &mut self,
        cursor: Option<Value>,
        floor: Severity,
        history_size: usize,
    ) -> anyhow::Result<(Vec<LogRecord>, Value)> {
        let metadata = std::fs::metadata(&self.path)?;
        let current_inode = inode_of(&metadata);
        let file_len = metadata.len();

        let (stored_inode, stored_offset) = match &cursor {
            Some(c) => (
                c.get("inode").and_then(Value::as_u64),
                c.get("byte_offset").and_then(Value::as_u64).unwrap_or(0),
            ),
            None => (None, 0),
        };

        let mut entries = Vec::new();
        let new_offset;

        if cursor.is_none() {
            // First run: tail a bounded backfill, then start at the end.
            let content = std::fs::read_to_string(&self.path)?;
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(history_size);
            for line in &lines[start..] {
                if let Some(record) = parse_line(line, floor) {
                    entries.push(record);
                }
            }
            new_offset = file_len;
        } else {
            // Rotation (inode changed) or truncation (file shrank) restarts
            // the scan from the top of the new file.
            let offset = match stored_inode {
                Some(inode) if inode != current_inode => 0,
                _ if stored_offset > file_len => 0,
                _ => stored_offset,
            };

            let mut file = std::fs::File::open(&self.path)?;
            file.seek(SeekFrom::Start(offset))?;
            let mut fresh = String::new();
            file.read_to_string(&mut fresh)?;

            for line in fresh.lines() {
                if let Some(record) = parse_line(line, floor) {
                    entries.push(record);
                }
            }
            new_offset = offset + fresh.len() as u64;
        }

        let new_cursor = json!({ "inode": current_inode, "byte_offset": new_offset });
        Ok((entries, new_cursor))
    }
}

fn parse_line(line: &str, floor: Severity) -> Option<LogRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let severity = parse_severity(line);
    if severity < floor {
        return None;
    }

    let timestamp = parse_local_prefix(line, Local::now().year(), local_offset_seconds())?;

    // Strip "<timestamp> <host> " and keep the message body.
    let message = line
        .splitn(5, ' ')
        .collect::<Vec<_>>()
        .get(4)
        .map(|m| m.to_string())
        .unwrap_or_else(|| line.to_string());

    Some(LogRecord {
        source: LogSource::Syslog,
        timestamp,
        severity,
        message,
        context: None,
    })
}

/// Parse `Sep  7 13:14:25` against an assumed year, converting from the
/// given local UTC offset. Returns UTC seconds.
fn parse_local_prefix(line: &str, year: i32, offset_seconds: i64) -> Option<i64> {
    let mut fields = line.split_whitespace();
    let month = fields.next()?;
    let day: u32 = fields.next()?.parse().ok()?;
    let clock = fields.next()?;

    let month_num = match month {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" => 6,
        "Jul" => 7,
        "Aug" => 8,
        "Sep" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };

    let mut clock_fields = clock.split(':');
    let hour: u32 = clock_fields.next()?.parse().ok()?;
    let minute: u32 = clock_fields.next()?.parse().ok()?;
    let second: u32 = clock_fields.next()?.parse().ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month_num, day)?
        .and_hms_opt(hour, minute, second)?;
    Some(naive.and_utc().timestamp() - offset_seconds)
}

fn local_offset_seconds() -> i64 {
    Local.timestamp_opt(0, 0).single().map_or(0, |t| {
        t.offset().local_minus_utc() as i64
    })
}

fn inode_of(metadata: &std::fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        metadata.ino()
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        0
    }
}
