use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use archivedl_core::{
    load_config, validate_config, ArchiveEngine, ArchiveSearchResolver, DownloadEngine,
    SearchResolver, TaskOrchestrator,
};

use archivedl_server::api::create_router;
use archivedl_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("ARCHIVEDL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Download dir: {:?}", config.storage.download_dir);
    info!("Data dir: {:?}", config.storage.data_dir);

    // Storage folders are created up front so the first submission does
    // not race directory creation.
    tokio::fs::create_dir_all(&config.storage.download_dir)
        .await
        .with_context(|| format!("Failed to create {:?}", config.storage.download_dir))?;
    tokio::fs::create_dir_all(config.storage.cache_dir())
        .await
        .with_context(|| format!("Failed to create {:?}", config.storage.cache_dir()))?;

    // Create collaborators
    let resolver: Arc<dyn SearchResolver> = Arc::new(ArchiveSearchResolver::new(
        config.resolver.clone(),
        config.storage.cache_dir(),
    ));
    info!("Search resolver initialized ({})", resolver.name());

    let engine: Arc<dyn DownloadEngine> = Arc::new(ArchiveEngine::new(config.engine.clone()));
    info!("Download engine initialized ({})", engine.name());

    // Create orchestrator; its worker is spawned lazily on first submit
    // and supervised from then on.
    let orchestrator = Arc::new(TaskOrchestrator::new(
        config.worker.clone(),
        resolver,
        engine,
    ));
    info!("Task orchestrator initialized");

    // Create app state and router
    let app_state = Arc::new(AppState::new(config.clone(), Arc::clone(&orchestrator)));
    let app = create_router(app_state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    orchestrator.shutdown().await;

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
