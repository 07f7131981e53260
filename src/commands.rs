//! Command plane domain model.
//!
//! Commands queue FIFO per agent. Status transitions are enforced with
//! conditional updates in storage; this module holds the vocabulary and
//! the typed payload surface. Unrecognized payloads are accepted at
//! enqueue time and fail with `UnknownCommand` at execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command lifecycle.
///
/// `pending → delivered [→ executing] → completed | failed`, with
/// `pending`/`delivered` elapsing to `expired` on TTL. Terminal states
/// never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Delivered,
    Executing,
    Completed,
    Failed,
    Expired,
}

impl CommandStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Delivered => "delivered",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CommandStatus::Pending),
            "delivered" => Some(CommandStatus::Delivered),
            "executing" => Some(CommandStatus::Executing),
            "completed" => Some(CommandStatus::Completed),
            "failed" => Some(CommandStatus::Failed),
            "expired" => Some(CommandStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CommandStatus::Completed | CommandStatus::Failed | CommandStatus::Expired
        )
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire form of a command handed to an agent (poll response or stream push).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: i64,
    pub agent_id: String,
    pub command_type: String,
    pub payload: Value,
    pub created_at: i64,
}

/// Admin enqueue request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub agent_id: String,
    pub command_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// Agent-submitted execution outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultReport {
    pub command_id: i64,
    /// `"completed"` or `"failed"`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// BMC fan modes understood by `fan_control` / `set_bmc_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FanMode {
    Standard,
    Full,
    Optimal,
    HeavyIo,
}

/// Typed view of the recognized command payloads.
///
/// The `Raw` arm keeps forward compatibility: new command types flow
/// through enqueue and delivery untouched and surface `UnknownCommand`
/// only on the executing agent.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    SetBmcMode(FanMode),
    SetFanSpeeds { zone0: u8, zone1: u8 },
    FanStatus,
    IpmiRaw { command: String },
    SystemInfo { kind: String },
    Reboot { delay_sec: u64 },
    Raw { command_type: String, payload: Value },
}

impl CommandAction {
    /// Interpret a `(command_type, payload)` pair. Anything that does not
    /// match a recognized schema lands in `Raw`.
    pub fn parse(command_type: &str, payload: &Value) -> Self {
        let raw = || CommandAction::Raw {
            command_type: command_type.to_string(),
            payload: payload.clone(),
        };

        match command_type {
            "fan_control" => match payload.get("action").and_then(Value::as_str) {
                Some("set_bmc_mode") => {
                    match payload
                        .get("mode")
                        .and_then(|m| serde_json::from_value::<FanMode>(m.clone()).ok())
                    {
                        Some(mode) => CommandAction::SetBmcMode(mode),
                        None => raw(),
                    }
                }
                Some("set_fan_speeds") => {
                    let zone = |key: &str| {
                        payload
                            .get(key)
                            .and_then(Value::as_u64)
                            .filter(|v| *v <= 100)
                            .map(|v| v as u8)
                    };
                    match (zone("zone0"), zone("zone1")) {
                        (Some(zone0), Some(zone1)) => CommandAction::SetFanSpeeds { zone0, zone1 },
                        _ => raw(),
                    }
                }
                Some("get_status") => CommandAction::FanStatus,
                _ => raw(),
            },
            "ipmi_raw" => match payload.get("command").and_then(Value::as_str) {
                Some(cmd) if !cmd.trim().is_empty() => CommandAction::IpmiRaw {
                    command: cmd.to_string(),
                },
                _ => raw(),
            },
            "system_info" => match payload.get("type").and_then(Value::as_str) {
                Some(kind) => CommandAction::SystemInfo {
                    kind: kind.to_string(),
                },
                None => raw(),
            },
            "reboot" => CommandAction::Reboot {
                delay_sec: payload.get("delay_sec").and_then(Value::as_u64).unwrap_or(0),
            },
            _ => raw(),
        }
    }
}

/// Per-type delivery TTL in seconds (floor 60).
pub fn ttl_for(command_type: &str) -> i64 {
    match command_type {
        "reboot" => 600,
        _ => 300,
    }
}
