use std::time::Duration;

use community_relay::api;
use community_relay::config::{self, Config};
use community_relay::database::Database;
use community_relay::security::FileSystemGuard;
use community_relay::state::AppState;

/// How long queued uploads get to finish after a shutdown signal
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // RUST_LOG, when set, overrides the configured level
    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .parse_default_env()
        .init();

    log::info!("Starting Community Relay");
    log::debug!("Configuration: {:?}", config);

    config::ensure_directories(&config)?;
    match FileSystemGuard::cleanup_stale_scratch(&config.temp_dir) {
        Ok(0) => {}
        Ok(removed) => log::info!("Removed {} stale scratch file(s)", removed),
        Err(e) => log::warn!("Failed to clean scratch directory: {}", e),
    }

    let db = Database::connect(&config.database_path()).await?;
    let addr = config.listen_addr();

    let (state, workers) = AppState::initialize(config, db)?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // the router held the last queue sender, so workers now drain and exit
    log::info!("Waiting for queued uploads to finish...");
    let drain = async {
        for worker in workers {
            if let Err(e) = worker.await {
                log::error!("Upload worker panicked: {}", e);
            }
        }
    };
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, drain).await.is_err() {
        log::warn!("Upload workers still busy after {:?}, exiting anyway", WORKER_DRAIN_TIMEOUT);
    }

    log::info!("Community Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}
