//! Shared wire types for the rackwatch telemetry plane.
//!
//! Everything agents and the server exchange over HTTPS is defined here so
//! both binaries (and the tests) serialize from one source of truth.
//! Timestamps are integer UTC seconds unless a field name says otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod api;
pub mod audit;
pub mod auth;
pub mod commands;
pub mod config;
pub mod ingest;
pub mod labels;
pub mod query;
pub mod retention;
pub mod storage;

pub use labels::Labels;

/// One scalar sample emitted by an exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub metric_name: String,

    /// Dimensional labels; an empty map is valid.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// JSON number; integers up to 2^53 survive the wire intact.
    pub value: f64,

    /// UTC seconds at collection time.
    pub timestamp: i64,

    /// Optional `"int"` / `"float"` hint for first-sight series creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_kind_hint: Option<String>,
}

/// A batch of samples pushed by one agent, optionally with piggybacked logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBatch {
    pub agent_id: String,

    /// When the agent assembled the batch (UTC seconds).
    pub batch_timestamp: i64,

    pub samples: Vec<Sample>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogRecord>,
}

/// Severity on an ascending 0..7 scale (DEBUG lowest, EMERGENCY highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Severity::Debug),
            1 => Some(Severity::Info),
            2 => Some(Severity::Notice),
            3 => Some(Severity::Warning),
            4 => Some(Severity::Error),
            5 => Some(Severity::Critical),
            6 => Some(Severity::Alert),
            7 => Some(Severity::Emergency),
            _ => None,
        }
    }

    /// Map a systemd-journal PRIORITY value (0 = emerg .. 7 = debug).
    pub fn from_journal_priority(priority: u8) -> Self {
        match priority {
            0 => Severity::Emergency,
            1 => Severity::Alert,
            2 => Severity::Critical,
            3 => Severity::Error,
            4 => Severity::Warning,
            5 => Severity::Notice,
            7 => Severity::Debug,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        };
        write!(f, "{s}")
    }
}

/// Where a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Kernel,
    Journal,
    Syslog,
    Application,
}

impl LogSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LogSource::Kernel => "kernel",
            LogSource::Journal => "journal",
            LogSource::Syslog => "syslog",
            LogSource::Application => "application",
        }
    }
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One shipped log line with a UTC-normalized timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: LogSource,

    /// Always UTC seconds; the agent converts from whatever the source
    /// provides (boot offsets, local-time prefixes, realtime microseconds).
    pub timestamp: i64,

    pub severity: Severity,

    /// Formatted message, possibly with a `[unit] identifier[pid]:` prefix.
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<LogContext>,
}

/// Structured context preserved alongside the formatted message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Batch of log records shipped via `POST /api/logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub agent_id: String,
    pub entries: Vec<LogRecord>,
}

/// Signed enrollment request, gated by the admin token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub agent_id: String,
    pub hostname: String,

    /// PEM-encoded RSA public key the agent proves possession of.
    pub public_key: String,

    /// `"<agent_id>:<timestamp>"`; the trailing timestamp must equal
    /// `timestamp` below.
    pub challenge: String,

    /// Base64 PKCS#1 v1.5 SHA-256 signature over `challenge`.
    pub signature: String,

    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub agent_id: String,
    pub bearer_token: String,
}

/// Response to `GET /api/client/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub agent_id: String,
    pub hostname: String,
    pub last_seen: Option<i64>,
}

/// One rejected sample out of a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRejection {
    /// Index into the submitted batch.
    pub index: usize,
    pub reason: String,
}

/// Whole-batch ingestion summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub series_created: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejections: Vec<SampleRejection>,
}
