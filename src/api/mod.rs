//! HTTPS API for agents and admins.
//!
//! ## Architecture
//!
//! - **Axum** router with Tower middleware (trace + CORS)
//! - shared [`state::ApiState`] carrying the store, ingestor, auth
//!   service, audit sink, and command-stream registry
//! - **WebSocket** command stream alongside the polling path
//!
//! ## Endpoints
//!
//! - `POST /api/clients/register` - enrollment (admin token in body)
//! - `GET  /api/client/verify` - bearer self-check
//! - `POST /api/metrics` - batch ingest (agent)
//! - `POST /api/logs` - log ingest (agent)
//! - `GET  /api/commands/{agent_id}` - pending-command poll
//! - `GET  /api/commands/stream` - WebSocket command stream
//! - `POST /api/commands` - enqueue (admin)
//! - `POST /api/command-results` - execution outcome (agent)
//! - `GET  /api/command/{command_id}` - status readback (admin)
//! - `GET  /api/clients` / `DELETE /api/clients/{agent_id}` - admin
//! - `GET  /api/timeseries/{metric}` (+ `/rate`), `GET /api/latest/{metric}`
//! - `GET  /api/stats`, `GET /health`

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;

pub use error::{ApiError, ApiResult, ErrorKind};
pub use state::ApiState;

use std::net::SocketAddr;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/clients/register", post(routes::register::register_agent))
        .route("/api/client/verify", get(routes::clients::verify_client))
        .route("/api/clients", get(routes::clients::list_clients))
        .route("/api/clients/:agent_id", delete(routes::clients::revoke_client))
        .route("/api/metrics", post(routes::metrics::submit_metrics))
        .route("/api/logs", post(routes::logs::submit_logs))
        .route("/api/commands", post(routes::commands::create_command))
        .route("/api/commands/stream", get(stream::command_stream_handler))
        .route("/api/commands/:agent_id", get(routes::commands::poll_commands))
        .route("/api/command/:command_id", get(routes::commands::command_status))
        .route(
            "/api/command-results",
            post(routes::commands::submit_command_result),
        )
        .route(
            "/api/timeseries/:metric_name",
            get(routes::timeseries::get_timeseries),
        )
        .route(
            "/api/timeseries/:metric_name/rate",
            get(routes::timeseries::get_rate_timeseries),
        )
        .route("/api/latest/:metric_name", get(routes::timeseries::get_latest))
        .route("/api/stats", get(routes::stats::get_stats))
        .route("/health", get(routes::stats::health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // Per-request deadline; long-lived WebSocket upgrades are exempt
        // because the timeout applies to the HTTP exchange.
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve until `shutdown` resolves, draining in-flight requests.
pub async fn serve(
    config: &ServerConfig,
    state: ApiState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = build_router(state);

    if config.use_tls {
        let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            config.tls_cert_path(),
            config.tls_key_path(),
        )
        .await?;

        info!("listening on https://{addr}");

        let handle = axum_server::Handle::new();
        let drain_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.await;
            drain_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!("listening on http://{addr} (TLS disabled)");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
    }

    Ok(())
}

/// Spawn a plain-HTTP server on an ephemeral port (tests and local dev).
pub async fn spawn_api_server(state: ApiState) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = build_router(state);

    info!("API server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {e}");
        }
    });

    Ok(addr)
}
