//! Enrollment and authentication scenarios.

use rackwatch::auth::AgentKeys;
use rackwatch::{RegistrationResponse, VerifyResponse};

use super::helpers::{TestServer, ADMIN_TOKEN};

#[tokio::test]
async fn test_registration_happy_path() {
    let server = TestServer::spawn().await;

    let keys_dir = tempfile::tempdir().unwrap();
    let keys = AgentKeys::new(keys_dir.path());
    keys.ensure_keys().unwrap();

    let now = chrono::Utc::now().timestamp();
    let request = keys.create_registration_request("host01", "host01", now).unwrap();
    let mut body = serde_json::to_value(&request).unwrap();
    body["admin_token"] = serde_json::Value::String(ADMIN_TOKEN.to_string());

    let response = server
        .http
        .post(server.url("/api/clients/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let registered: RegistrationResponse = response.json().await.unwrap();
    assert_eq!(registered.agent_id, "host01");
    assert!(registered.bearer_token.starts_with("rw_"));

    // The fresh bearer identifies the agent.
    let verify = server
        .http
        .get(server.url("/api/client/verify"))
        .bearer_auth(&registered.bearer_token)
        .send()
        .await
        .unwrap();
    assert_eq!(verify.status(), 200);
    let info: VerifyResponse = verify.json().await.unwrap();
    assert_eq!(info.agent_id, "host01");
    assert_eq!(info.hostname, "host01");
    assert!(info.last_seen.unwrap() >= now);
}

#[tokio::test]
async fn test_reregistration_same_key_is_idempotent() {
    let server = TestServer::spawn().await;

    let keys_dir = tempfile::tempdir().unwrap();
    let keys = AgentKeys::new(keys_dir.path());
    keys.ensure_keys().unwrap();

    let mut tokens = Vec::new();
    for _ in 0..2 {
        let now = chrono::Utc::now().timestamp();
        let request = keys.create_registration_request("host01", "host01", now).unwrap();
        let mut body = serde_json::to_value(&request).unwrap();
        body["admin_token"] = serde_json::Value::String(ADMIN_TOKEN.to_string());

        let response = server
            .http
            .post(server.url("/api/clients/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let registered: RegistrationResponse = response.json().await.unwrap();
        tokens.push(registered.bearer_token);
    }

    assert_eq!(tokens[0], tokens[1]);
}

#[tokio::test]
async fn test_reregistration_with_different_key_conflicts() {
    let server = TestServer::spawn().await;
    server.register_agent("host01").await;

    // A second keypair claiming the same agent_id must be refused.
    let other_dir = tempfile::tempdir().unwrap();
    let other_keys = AgentKeys::new(other_dir.path());
    other_keys.ensure_keys().unwrap();

    let now = chrono::Utc::now().timestamp();
    let request = other_keys
        .create_registration_request("host01", "host01", now)
        .unwrap();
    let mut body = serde_json::to_value(&request).unwrap();
    body["admin_token"] = serde_json::Value::String(ADMIN_TOKEN.to_string());

    let response = server
        .http
        .post(server.url("/api/clients/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error_kind"], "already_registered");
}

#[tokio::test]
async fn test_bad_admin_token_rejected() {
    let server = TestServer::spawn().await;

    let keys_dir = tempfile::tempdir().unwrap();
    let keys = AgentKeys::new(keys_dir.path());
    keys.ensure_keys().unwrap();

    let now = chrono::Utc::now().timestamp();
    let request = keys.create_registration_request("host01", "host01", now).unwrap();
    let mut body = serde_json::to_value(&request).unwrap();
    body["admin_token"] = serde_json::Value::String("wrong_token".to_string());

    let response = server
        .http
        .post(server.url("/api/clients/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_tampered_signature_rejected() {
    let server = TestServer::spawn().await;

    let keys_dir = tempfile::tempdir().unwrap();
    let keys = AgentKeys::new(keys_dir.path());
    keys.ensure_keys().unwrap();

    let now = chrono::Utc::now().timestamp();
    let mut request = keys.create_registration_request("host01", "host01", now).unwrap();
    request.challenge = format!("host66:{now}");

    let mut body = serde_json::to_value(&request).unwrap();
    body["admin_token"] = serde_json::Value::String(ADMIN_TOKEN.to_string());

    let response = server
        .http
        .post(server.url("/api/clients/register"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_unknown_bearer_rejected() {
    let server = TestServer::spawn().await;
    let response = server
        .http
        .get(server.url("/api/client/verify"))
        .bearer_auth("rw_definitely_not_issued")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_admin_endpoints_reject_agent_tokens() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let response = server
        .http
        .get(server.url("/api/stats"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_revocation_invalidates_bearer() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let response = server
        .http
        .delete(server.url("/api/clients/host01"))
        .basic_auth("admin", Some(ADMIN_TOKEN))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let verify = server
        .http
        .get(server.url("/api/client/verify"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();
    assert_eq!(verify.status(), 401);
}
