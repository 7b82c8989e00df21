use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod app_state;
mod approval;
mod config;
mod db;
mod errors;
mod middleware;
mod utils;

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::memory::InMemoryStore;
use crate::db::pool::PgDocumentStore;
use crate::db::store::DocumentStore;

/// Console logging plus, when `LOG_DIR` is set, a daily-rolling file. The
/// returned guard must live as long as the process to flush the file writer.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stockroom=debug,tower_http=info"));

    match &config.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "stockroom.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;
    let _log_guard = init_tracing(&config);

    let pg_store = match &config.database_url {
        Some(url) => Some(
            PgDocumentStore::connect(url)
                .await
                .context("failed to connect to the database")?,
        ),
        None => None,
    };
    let store: Arc<dyn DocumentStore> = match &pg_store {
        Some(pg) => {
            info!("Using Postgres document store");
            Arc::new(pg.clone())
        }
        None => {
            info!("DATABASE_URL not set, using in-memory document store");
            Arc::new(InMemoryStore::new())
        }
    };

    if config.auth_disabled {
        tracing::warn!("Authentication is disabled; every caller is treated as an admin");
    }

    let bind_addr = config.bind_addr;
    let app = api::router(AppState::new(store, config));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("Server running at http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server encountered an error")?;

    if let Some(pg) = pg_store {
        info!("Closing database pool...");
        pg.close().await;
    }
    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => tracing::error!("Failed to listen for Ctrl+C: {e}"),
    }
}
