use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use vetclinic_service::{app, ServiceState};
use vetclinic_store_sqlite::{DatabaseLocation, DEFAULT_DATABASE_URL};

#[derive(Debug, Parser)]
#[command(name = "vetclinic-service")]
#[command(about = "Local HTTP service for the veterinary clinic database")]
struct Args {
    #[arg(long, env = "VETCLINIC_DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,
    #[arg(long, env = "VETCLINIC_BIND", default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    #[arg(long, env = "VETCLINIC_OPERATION_TIMEOUT_MS", default_value_t = 2500)]
    operation_timeout_ms: u64,
    /// Emit one JSON object per log line.
    #[arg(long, env = "VETCLINIC_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let location = DatabaseLocation::parse(&args.database_url)?;
    let state = ServiceState::new(location, Duration::from_millis(args.operation_timeout_ms))?;
    state
        .initialize()
        .context("failed to prepare clinic database")?;

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, database_url = %args.database_url, "vetclinic service listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }
}
