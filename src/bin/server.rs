use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rackwatch::api::{self, ApiState};
use rackwatch::audit::AuditLog;
use rackwatch::auth::AuthService;
use rackwatch::config::{read_server_config, ServerConfig};
use rackwatch::retention::{RetentionPolicy, RetentionTask};
use rackwatch::storage::SqliteStore;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "rackwatch-server", about = "rackwatch telemetry server")]
struct Args {
    /// Config file (YAML)
    #[arg(short = 'c', long = "config")]
    config: String,

    /// Override the bind interface (absent flags never clobber config)
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(long)]
    port: Option<u16>,
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::DEBUG,
        "TRACE" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    };
    let targets = filter::Targets::new().with_targets(vec![
        ("rackwatch", level),
        ("rackwatch_server", level),
        ("tower_http", LevelFilter::WARN),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(targets)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Startup/config problems exit 1; unrecoverable runtime errors exit 2.
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);
    trace!("started with args: {args:?}");

    match run(config).await {
        Ok(()) => {}
        Err(e) => {
            error!("fatal runtime error: {e:#}");
            std::process::exit(2);
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut config = read_server_config(&args.config)?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if config.use_tls {
        for path in [config.tls_cert_path(), config.tls_key_path()] {
            if !path.exists() {
                anyhow::bail!("TLS material missing: {}", path.display());
            }
        }
    }
    Ok(config)
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    // Startup order: datastore, credentials, background sweep, listener.
    let store = match SqliteStore::open(&config.db_path).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // A datastore that can't open is a startup error, not a runtime one.
            eprintln!("datastore error: {e}");
            std::process::exit(1);
        }
    };
    info!("{}", store.describe().await);

    let auth = match AuthService::load(&config.admin_token_path(), config.test_mode) {
        Ok(auth) => Arc::new(auth),
        Err(e) => {
            eprintln!("auth setup error: {e:#}");
            std::process::exit(1);
        }
    };
    if auth.test_mode() {
        info!("test mode active: dev admin token accepted");
    }

    let audit = AuditLog::new(config.audit_log_path());
    let state = ApiState::new(store.clone(), auth, audit);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let retention = RetentionTask::new(
        store.clone(),
        RetentionPolicy {
            metrics_retention_days: config.metrics_retention_days,
            logs_retention_days: config.logs_retention_days,
            interval: Duration::from_secs(config.cleanup_interval_sec.max(1)),
        },
    );
    let retention_handle = tokio::spawn(retention.run(shutdown_rx.clone()));
    info!("retention sweep started (every {}s)", config.cleanup_interval_sec);

    let signal_tx = shutdown_tx.clone();
    let shutdown_signal = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal, draining..."),
            Err(e) => error!("unable to listen for shutdown signal: {e}"),
        }
        let _ = signal_tx.send(true);
    };

    api::serve(&config, state, shutdown_signal).await?;

    // Listener has drained; stop background work and close the store.
    let _ = shutdown_tx.send(true);
    let _ = retention_handle.await;
    store.close().await;

    info!("clean shutdown");
    Ok(())
}
