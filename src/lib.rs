pub mod activity;
pub mod clock;
pub mod config;
pub mod db;
pub mod deployments;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod persistence;
pub mod query;
pub mod random;
pub mod revenue;
pub mod routes;
pub mod scheduler;
pub mod walk;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::EngineConfig;
pub use crate::db::Database;
pub use crate::engine::Engine;
pub use crate::errors::{AppError, AppResult};
pub use crate::persistence::{MemoryAdapter, PersistenceAdapter};
pub use crate::query::Dashboard;
pub use crate::random::{RandomSource, ScriptedRandom, SeededRandom, ThreadRandom};

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub async fn run() -> anyhow::Result<()> {
    let config_path = EngineConfig::path_from_env();
    let config = EngineConfig::load(config_path.as_deref()).context("loading engine config")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    init_tracing(&config.data_dir).map_err(anyhow::Error::msg)?;

    let database = Database::new(&config.database_path()).context("opening dashboard database")?;
    tracing::info!(path = %database.path().display(), "dashboard database ready");

    let listen_addr = config.listen_addr.clone();
    let engine = Engine::new(
        config,
        Arc::new(database),
        Arc::new(SystemClock),
        Arc::new(ThreadRandom),
    )?;
    engine.start();

    let app = routes::create_router(Dashboard::new(engine.clone()));
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {}", listen_addr))?;
    tracing::info!(addr = %listen_addr, "dashboard listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    engine.stop().await;
    served.context("serving dashboard")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

fn init_tracing(data_dir: &Path) -> Result<(), String> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "engine.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
