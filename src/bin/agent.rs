use clap::Parser;
use rackwatch::agent::http::AgentClient;
use rackwatch::agent::registration::ensure_registered;
use rackwatch::agent::runtime::AgentRuntime;
use rackwatch::auth::AgentKeys;
use rackwatch::config::read_agent_config;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "rackwatch-agent", about = "rackwatch edge agent")]
struct Args {
    /// Config file (YAML)
    #[arg(short = 'c', long = "config")]
    config: String,

    /// Run a single collection cycle and exit (installer hook)
    #[arg(long)]
    once: bool,

    /// Admin token for first-run registration (also: RACKWATCH_ADMIN_TOKEN)
    #[arg(long)]
    admin_token: Option<String>,
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_ascii_uppercase().as_str() {
        "DEBUG" => LevelFilter::DEBUG,
        "TRACE" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    };
    let targets = filter::Targets::new().with_targets(vec![
        ("rackwatch", level),
        ("rackwatch_agent", level),
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

    let config = match read_agent_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);
    trace!("started with args: {args:?}");

    let keys = AgentKeys::new(&config.auth_dir);
    let mut client = match AgentClient::new(&config.server_url, config.insecure_tls) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("client setup error: {e:#}");
            std::process::exit(1);
        }
    };

    let admin_token = args
        .admin_token
        .clone()
        .or_else(|| std::env::var("RACKWATCH_ADMIN_TOKEN").ok());

    let (agent_id, token) = match ensure_registered(&config, &keys, &client, admin_token).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("registration error: {e:#}");
            std::process::exit(1);
        }
    };
    client.set_token(token);

    let runtime = AgentRuntime::new(config, client, agent_id);

    if args.once {
        match runtime.run_once().await {
            Ok(()) => info!("single collection cycle complete"),
            Err(e) => {
                error!("collection cycle failed: {e:#}");
                std::process::exit(2);
            }
        }
        return;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received shutdown signal"),
            Err(e) => error!("unable to listen for shutdown signal: {e}"),
        }
        let _ = shutdown_tx.send(true);
    });

    runtime.run(shutdown_rx).await;
}
