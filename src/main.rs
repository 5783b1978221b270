use anyhow::Context;
use confa_rtc::config::{Config, LogFormat};
use confa_rtc::event::{MemoryEventStore, SharedWatcher};
use confa_rtc::routes::router;
use confa_rtc::shared::AppState;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "confa_rtc=debug,tower_http=debug".into());
    match config.log_format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    info!(config = ?config, "Starting realtime server");

    let shutdown = CancellationToken::new();

    // The in-memory store serves as both the room change feed and the event writer.
    let store = Arc::new(MemoryEventStore::new());
    let watcher = Arc::new(SharedWatcher::new(
        store.clone(),
        config.event_buffer_capacity,
    ));

    let gc = tokio::spawn({
        let watcher = Arc::clone(&watcher);
        let cancel = shutdown.child_token();
        let gc_period = config.event_gc_period;
        async move { watcher.run(cancel, gc_period).await }
    });

    let app_state = AppState::new(Arc::clone(&watcher), store)
        .with_peer_config(config.peer_config())
        .with_shutdown(shutdown.clone());
    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_web_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_web_address))?;
    info!("Server running on http://{}", config.listen_web_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    match tokio::time::timeout(config.shutdown_timeout, gc).await {
        Ok(Ok(Ok(()))) => info!("Realtime server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Shared watcher stopped with error"),
        Ok(Err(e)) => error!(error = %e, "Shared watcher task failed"),
        Err(_) => warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "Shutdown timed out"
        ),
    }

    Ok(())
}

/// Resolves on ctrl-c and cancels every peer session
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    shutdown.cancel();
}
