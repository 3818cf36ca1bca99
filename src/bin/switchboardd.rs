//! Switchboard daemon - WebSocket session server

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use switchboard::{ServerConfig, SessionServer};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "switchboardd")]
#[command(about = "Switchboard WebSocket session server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080", env = "SWITCHBOARD_BIND")]
    bind: String,

    /// Seconds between heartbeat sweeps
    #[arg(long, default_value_t = 10, env = "SWITCHBOARD_HEARTBEAT_INTERVAL_SECS")]
    heartbeat_interval_secs: u64,

    /// Seconds of silence before a session is evicted
    #[arg(long, default_value_t = 30, env = "SWITCHBOARD_HEARTBEAT_TIMEOUT_SECS")]
    heartbeat_timeout_secs: u64,

    /// Per-connection outbound queue capacity
    #[arg(long, default_value_t = 100, env = "SWITCHBOARD_OUTBOUND_BUFFER")]
    outbound_buffer: usize,

    /// Keep session data when a client reconnects
    #[arg(long, env = "SWITCHBOARD_RETAIN_DATA")]
    retain_data: bool,

    /// Log level
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr = args.bind.parse().context("Invalid bind address")?;
    let config = ServerConfig::new(bind_addr)
        .heartbeat_interval(Duration::from_secs(args.heartbeat_interval_secs))
        .heartbeat_timeout(Duration::from_secs(args.heartbeat_timeout_secs))
        .outbound_buffer(args.outbound_buffer)
        .retain_data_on_reconnect(args.retain_data);

    let server = SessionServer::new(config).context("Invalid server configuration")?;
    let addr = server.listen().await.context("Failed to start server")?;

    info!(addr = %addr, "Switchboard daemon started");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping server");
    server.close();

    info!("Switchboard daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
