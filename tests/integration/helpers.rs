//! Shared fixtures for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use rackwatch::api::{spawn_api_server, ApiState};
use rackwatch::audit::AuditLog;
use rackwatch::auth::{AgentKeys, AuthService};
use rackwatch::storage::SqliteStore;
use rackwatch::{RegistrationResponse, Sample, SampleBatch};

pub const ADMIN_TOKEN: &str = "adm_secret_abc";

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<SqliteStore>,
    pub http: reqwest::Client,
    // Held for cleanup.
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("test.db")).await.unwrap());
        let auth = Arc::new(AuthService::new(ADMIN_TOKEN.to_string(), false));
        let audit = AuditLog::new(dir.path().join("audit.jsonl"));

        let state = ApiState::new(store.clone(), auth, audit);
        let addr = spawn_api_server(state).await.unwrap();

        Self {
            addr,
            store,
            http: reqwest::Client::new(),
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Enroll a fresh agent with its own keypair; returns the bearer token.
    pub async fn register_agent(&self, agent_id: &str) -> String {
        let keys_dir = tempfile::tempdir().unwrap();
        let keys = AgentKeys::new(keys_dir.path());
        keys.ensure_keys().unwrap();

        let now = chrono::Utc::now().timestamp();
        let request = keys
            .create_registration_request(agent_id, agent_id, now)
            .unwrap();

        let mut body = serde_json::to_value(&request).unwrap();
        body["admin_token"] = serde_json::Value::String(ADMIN_TOKEN.to_string());

        let response = self
            .http
            .post(self.url("/api/clients/register"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "registration failed");

        let registered: RegistrationResponse = response.json().await.unwrap();
        registered.bearer_token
    }

    /// Push a batch of samples as `agent_id` with `bearer`.
    pub async fn ingest(
        &self,
        agent_id: &str,
        bearer: &str,
        samples: Vec<Sample>,
    ) -> reqwest::Response {
        let batch = SampleBatch {
            agent_id: agent_id.to_string(),
            batch_timestamp: chrono::Utc::now().timestamp(),
            samples,
            logs: Vec::new(),
        };
        self.http
            .post(self.url("/api/metrics"))
            .bearer_auth(bearer)
            .json(&batch)
            .send()
            .await
            .unwrap()
    }

    pub fn admin_get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.url(path))
            .basic_auth("admin", Some(ADMIN_TOKEN))
    }

    pub fn admin_post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .basic_auth("admin", Some(ADMIN_TOKEN))
    }
}

pub fn sample(metric: &str, value: f64, ts: i64) -> Sample {
    Sample {
        metric_name: metric.to_string(),
        labels: Default::default(),
        value,
        timestamp: ts,
        value_kind_hint: None,
    }
}

pub fn labelled(metric: &str, value: f64, ts: i64, pairs: &[(&str, &str)]) -> Sample {
    let mut s = sample(metric, value, ts);
    s.labels = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    s
}
