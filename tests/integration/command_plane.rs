//! Command plane round trips over HTTP.

use serde_json::{json, Value};

use super::helpers::TestServer;

#[tokio::test]
async fn test_command_round_trip() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    // Admin enqueues a fan command.
    let created: Value = server
        .admin_post("/api/commands")
        .json(&json!({
            "agent_id": "host01",
            "command_type": "fan_control",
            "payload": {"action": "set_fan_speeds", "zone0": 60, "zone1": 80},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let command_id = created["command_id"].as_i64().unwrap();
    assert_eq!(created["status"], "pending");

    // Agent polls: the command arrives and flips to delivered.
    let polled: Value = server
        .http
        .get(server.url("/api/commands/host01"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let commands = polled["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command_id"].as_i64().unwrap(), command_id);
    assert_eq!(commands[0]["payload"]["zone0"], 60);

    // A second poll comes back empty.
    let again: Value = server
        .http
        .get(server.url("/api/commands/host01"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(again["commands"].as_array().unwrap().is_empty());

    // Agent reports success.
    let result = server
        .http
        .post(server.url("/api/command-results"))
        .bearer_auth(&bearer)
        .json(&json!({
            "command_id": command_id,
            "status": "completed",
            "result": {"applied": true},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(result.status(), 200);

    // Admin reads the settled command back.
    let status: Value = server
        .admin_get(&format!("/api/command/{command_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "completed");
    assert!(status["result"].as_str().unwrap().contains("applied"));
}

#[tokio::test]
async fn test_agent_cannot_poll_for_another() {
    let server = TestServer::spawn().await;
    let bearer_a = server.register_agent("host01").await;
    server.register_agent("host02").await;

    let response = server
        .http
        .get(server.url("/api/commands/host02"))
        .bearer_auth(&bearer_a)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_result_for_foreign_command_rejected() {
    let server = TestServer::spawn().await;
    let bearer_a = server.register_agent("host01").await;
    let bearer_b = server.register_agent("host02").await;

    let created: Value = server
        .admin_post("/api/commands")
        .json(&json!({
            "agent_id": "host01",
            "command_type": "system_info",
            "payload": {"type": "hostname"},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let command_id = created["command_id"].as_i64().unwrap();

    // host01 takes delivery.
    server
        .http
        .get(server.url("/api/commands/host01"))
        .bearer_auth(&bearer_a)
        .send()
        .await
        .unwrap();

    // host02 cannot settle host01's command.
    let response = server
        .http
        .post(server.url("/api/command-results"))
        .bearer_auth(&bearer_b)
        .json(&json!({"command_id": command_id, "status": "completed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_terminal_command_rejects_further_results() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    let created: Value = server
        .admin_post("/api/commands")
        .json(&json!({
            "agent_id": "host01",
            "command_type": "ipmi_raw",
            "payload": {"command": "0x30 0x45 0x00"},
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let command_id = created["command_id"].as_i64().unwrap();

    server
        .http
        .get(server.url("/api/commands/host01"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap();

    let first = server
        .http
        .post(server.url("/api/command-results"))
        .bearer_auth(&bearer)
        .json(&json!({"command_id": command_id, "status": "failed", "error": "no BMC"}))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);

    // The state machine refuses to leave a terminal state.
    let second = server
        .http
        .post(server.url("/api/command-results"))
        .bearer_auth(&bearer)
        .json(&json!({"command_id": command_id, "status": "completed"}))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);

    let status: Value = server
        .admin_get(&format!("/api/command/{command_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "failed");
    assert_eq!(status["error"], "no BMC");
}

#[tokio::test]
async fn test_unknown_command_type_accepted_at_enqueue() {
    let server = TestServer::spawn().await;
    server.register_agent("host01").await;

    // The server takes it; execution on the agent reports UnknownCommand.
    let response = server
        .admin_post("/api/commands")
        .json(&json!({
            "agent_id": "host01",
            "command_type": "firmware_update",
            "payload": {"image": "bmc-1.2.3.bin"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_command_for_unknown_agent_is_404() {
    let server = TestServer::spawn().await;
    let response = server
        .admin_post("/api/commands")
        .json(&json!({
            "agent_id": "ghost",
            "command_type": "reboot",
            "payload": {"delay_sec": 0},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_commands_deliver_fifo() {
    let server = TestServer::spawn().await;
    let bearer = server.register_agent("host01").await;

    for i in 0..3 {
        server
            .admin_post("/api/commands")
            .json(&json!({
                "agent_id": "host01",
                "command_type": "system_info",
                "payload": {"type": "uptime", "seq": i},
            }))
            .send()
            .await
            .unwrap();
    }

    let polled: Value = server
        .http
        .get(server.url("/api/commands/host01"))
        .bearer_auth(&bearer)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let commands = polled["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 3);
    let ids: Vec<i64> = commands
        .iter()
        .map(|c| c["command_id"].as_i64().unwrap())
        .collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}
