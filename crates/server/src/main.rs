use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harvestline_core::fs::LocalFileSystem;
use harvestline_core::{
    load_config, validate_config, BrowserSessionFactory, RunManager, SessionPipeline,
    WatchdogRegistry,
};

use harvestline_server::api::create_router;
use harvestline_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
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
    let config_path = std::env::var("HARVESTLINE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = config_hash[..16].to_string();

    info!(
        sessions = config.sessions.len(),
        enabled = config.enabled_sessions().count(),
        max_parallel = config.scheduler.max_parallel,
        config_hash = %config_hash_short,
        "Configuration loaded successfully"
    );
    info!("WebDriver endpoint: {}", config.webdriver.url);
    if config.sessions.is_empty() {
        warn!("No sessions configured; runs will have nothing to download");
    }

    let config = Arc::new(config);
    let fs = Arc::new(LocalFileSystem);
    let factory = Arc::new(BrowserSessionFactory::new(config.clone(), fs.clone()));
    let pipeline = SessionPipeline::new(config.clone(), factory, fs, WatchdogRegistry::new());
    let runs = RunManager::new(pipeline);

    let state = Arc::new(AppState::new(runs.clone(), config_hash_short));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Active runs are signalled but not awaited.
    info!("Server shutting down...");
    runs.cancel_all();

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
