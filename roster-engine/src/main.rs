//! roster-engine - Attendance and balance reconciliation service
//!
//! Serves the engine's operations over HTTP against a local SQLite database.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use roster_common::db::init_database;
use roster_common::EngineConfig;
use roster_engine::{build_router, AppState, Engine};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for roster-engine
#[derive(Parser, Debug)]
#[command(name = "roster-engine")]
#[command(about = "Recurring-session attendance and balance reconciliation service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database (overrides config and environment)
    #[arg(short, long)]
    data_folder: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5780 (overrides config and environment)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "roster_engine=info,roster_common=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting roster-engine v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let mut config =
        EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(data_folder) = args.data_folder {
        config.data_folder = data_folder;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let bind_addr = config.bind_addr.clone();
    let engine = Engine::new(pool, config);
    spawn_event_logger(&engine);

    let app = build_router(AppState::new(engine)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    info!("roster-engine listening on http://{}", bind_addr);
    info!("Health check: http://{}/health", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Log every engine event at debug level
fn spawn_event_logger(engine: &Engine) {
    let mut rx = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => debug!(event_type = event.event_type(), ?event, "Engine event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
