use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scribe_api::background::job_retention;
use scribe_api::config::ServerConfig;
use scribe_api::router::build_app_router;
use scribe_api::state::AppState;

/// How long to wait for the retention task after cancelling it.
const RETENTION_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    let state = AppState::build(config.clone()).expect("Failed to initialise transcription service");
    tracing::info!(
        worker_dir = %config.transcriber.worker_dir.display(),
        upload_dir = %config.upload_dir.display(),
        results_dir = %config.transcriber.results_dir.display(),
        pool_size = state.executor.stats().pool_size,
        "Transcription executor ready"
    );

    let retention_cancel = CancellationToken::new();
    let retention_task = match config.job_retention {
        Some(retention) => Some(tokio::spawn(job_retention::run(
            Arc::clone(&state.registry),
            retention,
            job_retention::CLEANUP_INTERVAL,
            retention_cancel.clone(),
        ))),
        None => {
            tracing::info!("Job retention disabled");
            None
        }
    };

    let executor = Arc::clone(&state.executor);
    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // The listener is closed; stop background work before exiting.
    retention_cancel.cancel();
    if let Some(task) = retention_task {
        if tokio::time::timeout(RETENTION_STOP_TIMEOUT, task).await.is_err() {
            tracing::warn!("Job retention task did not stop in time");
        }
    }

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    if executor.shutdown(grace).await {
        tracing::info!("All transcription jobs finished");
    } else {
        tracing::warn!(stats = ?executor.stats(), "Exiting with transcription jobs still running");
    }
    tracing::info!("Shutdown complete");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scribe_api=debug,scribe_core=debug,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl-C, or on SIGTERM where supported.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("Failed to install Ctrl-C handler");
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
        tracing::info!("Received Ctrl-C, shutting down");
    }
}
