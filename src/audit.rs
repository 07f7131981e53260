//! Security audit log.
//!
//! Append-only JSON-lines file recording authentication attempts,
//! registrations, and admin actions. Write failures are logged and
//! swallowed; auditing must never take a request down with it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[derive(Clone)]
pub struct AuditLog {
    path: PathBuf,
    sink: Arc<Mutex<Option<tokio::fs::File>>>,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Record an authentication attempt. Failed attempts carry only a
    /// token prefix (first 8 chars), never the full credential.
    pub async fn auth_attempt(&self, success: bool, auth_type: &str, details: Value) {
        self.log_event(
            "auth_attempt",
            json!({
                "success": success,
                "auth_type": auth_type,
                "details": details,
            }),
        )
        .await;
    }

    pub async fn registration(&self, success: bool, agent_id: &str, hostname: &str, detail: &str) {
        self.log_event(
            "agent_registration",
            json!({
                "success": success,
                "agent_id": agent_id,
                "hostname": hostname,
                "detail": detail,
            }),
        )
        .await;
    }

    pub async fn admin_action(&self, action: &str, details: Value) {
        self.log_event("admin_action", json!({ "action": action, "details": details }))
            .await;
    }

    async fn log_event(&self, event_type: &str, details: Value) {
        let record = json!({
            "timestamp": chrono::Utc::now().timestamp(),
            "event_type": event_type,
            "details": details,
        });

        let line = format!("{record}\n");

        let mut guard = self.sink.lock().await;
        if guard.is_none() {
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
            {
                Ok(file) => *guard = Some(file),
                Err(e) => {
                    warn!("audit log unavailable at {}: {e}", self.path.display());
                    return;
                }
            }
        }

        if let Some(file) = guard.as_mut() {
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!("audit write failed: {e}");
                *guard = None;
            } else if let Err(e) = file.flush().await {
                warn!("audit write failed: {e}");
                *guard = None;
            }
        }
    }
}

/// Truncate a presented token for audit records.
pub fn token_prefix(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
