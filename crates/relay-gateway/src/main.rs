use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use relay_channels::{Channel, WhatsAppBridge};
use relay_core::RelayConfig;
use relay_scheduler::{SqliteJobStore, TickOutcome};
use tracing::{info, warn};

mod app;
mod auth;
mod http;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(name = "relay-gateway", version, about = "Scheduled WhatsApp delivery service")]
struct Cli {
    /// Config file (default: $RELAY_CONFIG, then ~/.relay/relay.toml)
    #[arg(long)]
    config: Option<String>,

    /// Run a single scheduler tick, print the result and exit
    #[arg(long)]
    once: bool,

    /// With --once: how long to wait for the channel to become ready
    #[arg(long, default_value = "60")]
    ready_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_gateway=info,relay_scheduler=info,relay_channels=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > RELAY_CONFIG env > ~/.relay/relay.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("RELAY_CONFIG").ok());
    let mut config = RelayConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        RelayConfig::default()
    });
    if config.gateway.cron_secret.is_none() {
        config.gateway.cron_secret = std::env::var("CRON_SECRET").ok();
    }
    if config.gateway.trigger_secret().is_none() {
        warn!("no trigger secret configured; /api/jobs/run will reject every request");
    }

    // open SQLite; the store runs its schema migration on construction
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    let store = Arc::new(SqliteJobStore::new(db)?);
    info!("database migrations complete");

    let whatsapp = config.whatsapp.clone();
    let state = app::AppState::new(config, store, move || -> Arc<dyn Channel> {
        Arc::new(WhatsAppBridge::new(&whatsapp))
    });

    if cli.once {
        return run_once(&state, Duration::from_secs(cli.ready_timeout_secs)).await;
    }

    if state.config.whatsapp.connect_on_start {
        state.channel.request_connect();
    }

    // scheduler loop: recovers stale leases first, then ticks on the interval
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine = Arc::clone(&state.engine);
    let every = Duration::from_secs(state.config.scheduler.tick_interval_secs.max(1));
    let scheduler = tokio::spawn(engine.run(every, shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", state.config.gateway.bind, state.config.gateway.port).parse()?;
    info!("Relay gateway listening on {}", addr);

    let router = app::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop
    let _ = shutdown_tx.send(true);
    let _ = scheduler.await;
    info!("Relay gateway stopped");
    Ok(())
}

/// `--once`: connect, wait for readiness, run exactly one tick.
async fn run_once(state: &app::AppState, ready_timeout: Duration) -> anyhow::Result<()> {
    state.channel.request_connect();

    let deadline = tokio::time::Instant::now() + ready_timeout;
    while !state.channel.is_ready() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    if !state.channel.is_ready() {
        warn!(timeout_secs = ready_timeout.as_secs(), "channel not ready, tick will be skipped");
    }

    let recovered = state.engine.recover_stale().await?;
    if recovered > 0 {
        warn!(count = recovered, "recovered stale jobs");
    }

    let outcome = state.engine.tick().await?;
    let summary = match outcome {
        TickOutcome::Ran(report) => serde_json::json!({ "processed": report.processed(), "report": report }),
        TickOutcome::Skipped(reason) => serde_json::json!({ "processed": 0, "skipped": reason }),
    };
    println!("{summary}");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
