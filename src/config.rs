//! YAML configuration for both binaries.
//!
//! CLI arguments override config values only when explicitly provided;
//! absent CLI args never clobber what the file says.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::trace;

use crate::Severity;

/// Server process configuration, immutable after boot.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Root for `admin_token`, `server.crt`, `server.key`.
    pub auth_dir: PathBuf,

    /// SQLite datastore location.
    pub db_path: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_retention_days")]
    pub metrics_retention_days: u32,

    #[serde(default = "default_retention_days")]
    pub logs_retention_days: u32,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_sec: u64,

    /// Disables TLS only for local development.
    #[serde(default)]
    pub use_tls: bool,

    /// Accept the fixed dev admin token and allow generating an ephemeral
    /// one when none exists on disk.
    #[serde(default)]
    pub test_mode: bool,

    /// Append-only JSON-lines security audit log. Defaults next to the db.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

impl ServerConfig {
    pub fn admin_token_path(&self) -> PathBuf {
        self.auth_dir.join("admin_token")
    }

    pub fn tls_cert_path(&self) -> PathBuf {
        self.auth_dir.join("server.crt")
    }

    pub fn tls_key_path(&self) -> PathBuf {
        self.auth_dir.join("server.key")
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.audit_log
            .clone()
            .unwrap_or_else(|| self.db_path.with_extension("audit.jsonl"))
    }
}

/// Agent process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the server, e.g. `https://telemetry.example:8443`.
    pub server_url: String,

    /// Directory holding `client.key`, `client.pub`, `client_token` and the
    /// per-source log cursors. 0700.
    pub auth_dir: PathBuf,

    /// Stable agent identity; hostname-derived when omitted.
    #[serde(default)]
    pub agent_id: Option<String>,

    #[serde(default = "default_collect_interval")]
    pub interval_sec: u64,

    /// Command poll cadence; the server expects at most 90 s between polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_sec: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Open the persistent command stream in addition to polling.
    #[serde(default)]
    pub command_stream: bool,

    /// Accept self-signed server certificates (lab setups).
    #[serde(default)]
    pub insecure_tls: bool,

    #[serde(default)]
    pub log_shipping: LogShippingConfig,
}

/// Which log sources to ship and at what severity floor.
#[derive(Debug, Clone, Deserialize)]
pub struct LogShippingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_log_sources")]
    pub sources: Vec<String>,

    #[serde(default = "default_severity_floor")]
    pub severity_floor: Severity,

    /// Bounded first-run backfill per source.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for LogShippingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sources: default_log_sources(),
            severity_floor: default_severity_floor(),
            history_size: default_history_size(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_retention_days() -> u32 {
    7
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_collect_interval() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_log_sources() -> Vec<String> {
    vec!["kernel".to_string(), "journal".to_string()]
}

fn default_severity_floor() -> Severity {
    Severity::Warning
}

fn default_history_size() -> usize {
    1000
}

pub fn read_server_config(path: impl AsRef<Path>) -> anyhow::Result<ServerConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let config: ServerConfig = serde_yaml::from_str(&raw)?;
    trace!("loaded server config: {config:?}");
    Ok(config)
}

pub fn read_agent_config(path: impl AsRef<Path>) -> anyhow::Result<AgentConfig> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let config: AgentConfig = serde_yaml::from_str(&raw)?;
    trace!("loaded agent config: {config:?}");
    Ok(config)
}
