//! Enrollment workflow.
//!
//! On first run the agent generates its keypair, writes a signed
//! registration request to `auth_dir/registration_request.json` (for the
//! manual curl path), and, when an admin token is available, registers
//! itself and persists the returned bearer token with 0600 permissions.

use anyhow::Context;
use tracing::info;

use crate::auth::AgentKeys;
use crate::config::AgentConfig;
use crate::{RegistrationRequest, RegistrationResponse};

use super::http::AgentClient;

/// Derive the stable agent identity: explicit config wins, hostname
/// otherwise.
pub fn resolve_agent_id(config: &AgentConfig) -> String {
    config
        .agent_id
        .clone()
        .or_else(sysinfo::System::host_name)
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Ensure the agent holds a bearer token, registering if necessary.
///
/// Returns `(agent_id, bearer_token)`.
pub async fn ensure_registered(
    config: &AgentConfig,
    keys: &AgentKeys,
    client: &AgentClient,
    admin_token: Option<String>,
) -> anyhow::Result<(String, String)> {
    let agent_id = resolve_agent_id(config);

    if let Some(token) = keys.load_token() {
        return Ok((agent_id, token));
    }

    keys.ensure_keys()?;

    let hostname = sysinfo::System::host_name().unwrap_or_else(|| agent_id.clone());
    let now = chrono::Utc::now().timestamp();
    let request = keys.create_registration_request(&agent_id, &hostname, now)?;

    // Always drop the signed request on disk so an operator can finish
    // enrollment manually if no admin token is at hand.
    write_request_file(keys, &request)?;

    let Some(admin_token) = admin_token else {
        anyhow::bail!(
            "no bearer token in {} and no admin token provided; \
             a signed registration request was written to {}/registration_request.json; \
             POST it to {}/api/clients/register (with \"admin_token\") and save the returned \
             bearer_token to {}/client_token (chmod 600)",
            keys.auth_dir().display(),
            keys.auth_dir().display(),
            client.base_url(),
            keys.auth_dir().display(),
        );
    };

    let response = submit(client, &request, &admin_token)
        .await
        .context("registration request failed")?;

    keys.save_token(&response.bearer_token)?;
    info!("registered with server as {}", response.agent_id);

    Ok((response.agent_id, response.bearer_token))
}

async fn submit(
    client: &AgentClient,
    request: &RegistrationRequest,
    admin_token: &str,
) -> anyhow::Result<RegistrationResponse> {
    // The registration body is the signed request plus the admin token.
    let mut body = serde_json::to_value(request)?;
    body["admin_token"] = serde_json::Value::String(admin_token.to_string());

    let response: RegistrationResponse = client
        .post_json("/api/clients/register", &body)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    Ok(response)
}

fn write_request_file(keys: &AgentKeys, request: &RegistrationRequest) -> anyhow::Result<()> {
    let path = keys.auth_dir().join("registration_request.json");
    std::fs::create_dir_all(keys.auth_dir())?;
    std::fs::write(&path, serde_json::to_string_pretty(request)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}
