//! Shared state handed to every API handler.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::audit::AuditLog;
use crate::auth::AuthService;
use crate::ingest::Ingestor;
use crate::storage::SqliteStore;

use super::stream::StreamRegistry;

/// Concurrent ingest requests admitted before backpressure kicks in.
const INGEST_PERMITS: usize = 64;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SqliteStore>,
    pub ingestor: Ingestor,
    pub auth: Arc<AuthService>,
    pub audit: AuditLog,
    pub streams: StreamRegistry,

    /// Backpressure gate for `/api/metrics` and `/api/logs`: when no
    /// permit is immediately available the request gets a 503 with a
    /// Retry-After hint instead of queueing.
    pub ingest_permits: Arc<Semaphore>,
}

impl ApiState {
    pub fn new(store: Arc<SqliteStore>, auth: Arc<AuthService>, audit: AuditLog) -> Self {
        Self {
            ingestor: Ingestor::new(store.clone()),
            store,
            auth,
            audit,
            streams: StreamRegistry::default(),
            ingest_permits: Arc::new(Semaphore::new(INGEST_PERMITS)),
        }
    }
}
