use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{
        current_run, get_artifact, get_batch, health, post_download, post_signal, start_export,
        stop_export,
    },
    state::AppState,
};
use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::downloads::DownloadCoordinator;
use crate::host::devtools::{DevToolsConfig, DevToolsWorkerHost};
use crate::host::local::{LocalDownloadConfig, LocalDownloadHost};
use crate::host::DownloadHost;
use crate::ledger::ExportLedger;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;
use crate::tracker::reclaim::Reclaimer;
use crate::tracker::DownloadTracker;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Assemble the router for a fully-built application state. Kept separate
/// from `run` so integration tests can drive the same routes in-process.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/exports", post(start_export))
        .route("/exports/stop", post(stop_export))
        .route("/exports/current", get(current_run))
        .route("/exports/batches/{batch_id}", get(get_batch))
        .route("/signals", post(post_signal))
        .route("/downloads", post(post_download))
        .route("/artifacts/{artifact_id}", get(get_artifact))
        .route("/health", get(health))
        .with_state(state)
        // Automatically decompress gzip request bodies
        // Handles Content-Encoding header transparently at the middleware level
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    info!(path = %config.server.ledger_path.display(), "Opening export ledger");
    let ledger = Arc::new(
        ExportLedger::open(&config.server.ledger_path)
            .map_err(|e| format!("Failed to open ledger: {}", e))?,
    );

    let metrics = Arc::new(Metrics::new());
    let artifacts = ArtifactStore::in_memory();

    let worker_host = Arc::new(DevToolsWorkerHost::new(DevToolsConfig {
        endpoint: config.devtools.endpoint.clone(),
        connect_timeout: Duration::from_millis(config.devtools.connect_timeout_ms),
        request_timeout: Duration::from_millis(config.devtools.request_timeout_ms),
    })?);

    let download_host: Arc<dyn DownloadHost> =
        Arc::new(LocalDownloadHost::new(LocalDownloadConfig {
            root: config.downloads.root.clone(),
            connect_timeout: Duration::from_millis(config.downloads.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.downloads.request_timeout_ms),
            ..LocalDownloadConfig::default()
        })?);

    let tracker = Arc::new(DownloadTracker::new(
        Arc::clone(&download_host),
        config.export.poll_interval(),
    ));
    let reclaimer = Arc::new(Reclaimer::new(Arc::new(artifacts.clone())));

    let coordinator = Arc::new(DownloadCoordinator::new(
        Arc::clone(&download_host),
        Arc::clone(&tracker),
        reclaimer,
        artifacts.clone(),
        Arc::clone(&metrics),
        config.export.public_base.clone(),
        config.export.subdir_prefix.clone(),
        config.export.download_stagger(),
    ));
    coordinator.spawn_event_pump();

    let orchestrator = Orchestrator::new(
        worker_host,
        Arc::clone(&tracker),
        Arc::clone(&ledger),
        Arc::clone(&metrics),
        config.export.timing(),
        config.export.base_url.clone(),
        config.export.default_scope.clone(),
        config.export.close_worker_after_job,
    );

    let state = AppState::new(config, orchestrator, coordinator, artifacts, ledger, metrics);
    let app = build_app(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "chatexport API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
