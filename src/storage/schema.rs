//! Row types mirroring the relational schema.
//!
//! The schema splits metric points into two physical tables, one per
//! numeric kind, while the catalog (`metric_series`) pins each series to
//! exactly one kind. Rows here are plain data; all SQL lives in
//! [`super::sqlite`].

use serde::{Deserialize, Serialize};

use crate::commands::CommandStatus;

/// Numeric kind a series is locked to from its first sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Integer,
    Real,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Real => "real",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(ValueKind::Integer),
            "real" => Some(ValueKind::Real),
            _ => None,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A point value, typed to its physical table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Int(i64),
    Float(f64),
}

impl PointValue {
    pub fn kind(self) -> ValueKind {
        match self {
            PointValue::Int(_) => ValueKind::Integer,
            PointValue::Float(_) => ValueKind::Real,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            PointValue::Int(v) => v as f64,
            PointValue::Float(v) => v,
        }
    }
}

/// One registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRow {
    pub agent_id: String,
    pub hostname: String,
    #[serde(skip_serializing)]
    pub public_key: String,
    #[serde(skip_serializing)]
    pub bearer_token: String,
    pub registered_at: i64,
    pub last_seen: Option<i64>,
    pub status: String,
}

/// One catalog entry: the dimensional identity of a sample stream.
#[derive(Debug, Clone)]
pub struct SeriesRow {
    pub series_id: i64,
    pub agent_id: String,
    pub metric_name: String,
    pub labels_canonical: String,
    pub labels_hash: String,
    pub value_kind: ValueKind,
}

/// A point fetched back out of either physical table.
#[derive(Debug, Clone, Copy)]
pub struct PointRow {
    pub series_id: i64,
    pub timestamp: i64,
    pub value: PointValue,
}

/// A point waiting to be written.
#[derive(Debug, Clone, Copy)]
pub struct NewPoint {
    pub series_id: i64,
    pub timestamp: i64,
    pub value: PointValue,
}

/// One stored log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub entry_id: i64,
    pub agent_id: String,
    pub source: String,
    pub timestamp: i64,
    pub received_at: i64,
    pub severity: i64,
    pub message: String,
    pub context: Option<String>,
}

/// One queued or settled command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandRow {
    pub command_id: i64,
    pub agent_id: String,
    pub command_type: String,
    /// Opaque structured value, stored as JSON text.
    pub payload: String,
    pub status: CommandStatus,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub expires_at: i64,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// Datastore-wide counters for `GET /api/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub agents_total: i64,
    pub agents_active: i64,
    pub series_total: i64,
    pub points_int: i64,
    pub points_float: i64,
    pub log_entries: i64,
    pub commands_pending: i64,
}
