//! Remote command execution.
//!
//! Recognized command types run through platform tooling (`ipmitool`,
//! `systemctl`); anything else settles as failed with an unknown-command
//! error so the admin sees the outcome instead of a silent drop.

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use crate::commands::{CommandAction, CommandEnvelope, CommandResultReport, FanMode};

/// Supermicro BMC fan mode codes (`raw 0x30 0x45 0x01 <code>`).
fn bmc_mode_code(mode: FanMode) -> u8 {
    match mode {
        FanMode::Standard => 0x00,
        FanMode::Full => 0x01,
        FanMode::Optimal => 0x02,
        FanMode::HeavyIo => 0x04,
    }
}

#[derive(Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one command and produce its result report. Never errors:
    /// every failure mode becomes a `failed` report.
    pub async fn execute(&self, envelope: &CommandEnvelope) -> CommandResultReport {
        info!(
            "executing command {} ({})",
            envelope.command_id, envelope.command_type
        );

        let action = CommandAction::parse(&envelope.command_type, &envelope.payload);
        let outcome = self.run(action).await;

        match outcome {
            Ok(result) => CommandResultReport {
                command_id: envelope.command_id,
                status: "completed".to_string(),
                result: Some(result),
                error: None,
            },
            Err(error) => {
                warn!("command {} failed: {}", envelope.command_id, error);
                CommandResultReport {
                    command_id: envelope.command_id,
                    status: "failed".to_string(),
                    result: None,
                    error: Some(error),
                }
            }
        }
    }

    async fn run(&self, action: CommandAction) -> Result<Value, String> {
        match action {
            CommandAction::SetBmcMode(mode) => {
                let code = format!("0x{:02x}", bmc_mode_code(mode));
                run_ipmitool(&["raw", "0x30", "0x45", "0x01", &code]).await?;
                Ok(json!({ "applied": true, "mode": mode }))
            }

            CommandAction::SetFanSpeeds { zone0, zone1 } => {
                for (zone, duty) in [(0u8, zone0), (1u8, zone1)] {
                    let zone_arg = format!("0x{zone:02x}");
                    let duty_arg = format!("0x{duty:02x}");
                    run_ipmitool(&["raw", "0x30", "0x70", "0x66", "0x01", &zone_arg, &duty_arg])
                        .await?;
                }
                Ok(json!({ "applied": true, "zone0": zone0, "zone1": zone1 }))
            }

            CommandAction::FanStatus => {
                let raw = run_ipmitool(&["raw", "0x30", "0x45", "0x00"]).await?;
                Ok(json!({ "bmc_mode_raw": raw.trim() }))
            }

            CommandAction::IpmiRaw { command } => {
                let args: Vec<&str> = command.split_whitespace().collect();
                let mut full = vec!["raw"];
                full.extend(args);
                let raw = run_ipmitool(&full).await?;
                Ok(json!({ "output": raw.trim(), "command": command }))
            }

            CommandAction::SystemInfo { kind } => system_info(&kind),

            CommandAction::Reboot { delay_sec } => {
                info!("reboot requested in {delay_sec}s");
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_secs(delay_sec)).await;
                    let result = Command::new("systemctl").arg("reboot").status().await;
                    if let Err(e) = result {
                        warn!("reboot invocation failed: {e}");
                    }
                });
                Ok(json!({ "scheduled": true, "delay_sec": delay_sec }))
            }

            CommandAction::Raw { command_type, .. } => {
                Err(format!("UnknownCommand: {command_type}"))
            }
        }
    }
}

fn system_info(kind: &str) -> Result<Value, String> {
    match kind {
        "hostname" => Ok(json!({
            "hostname": sysinfo::System::host_name()
        })),
        "kernel" => Ok(json!({
            "kernel": sysinfo::System::kernel_version()
        })),
        "os" => Ok(json!({
            "os": sysinfo::System::long_os_version()
        })),
        "uptime" => Ok(json!({
            "uptime_seconds": sysinfo::System::uptime()
        })),
        other => Err(format!("UnknownCommand: system_info/{other}")),
    }
}

async fn run_ipmitool(args: &[&str]) -> Result<String, String> {
    let output = Command::new("ipmitool")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("ipmitool not runnable: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(format!(
            "ipmitool failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}
