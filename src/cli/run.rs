use crate::config::parse::load_config;
use crate::config::{Config, PathStore};
use crate::health::HealthMonitor;
use crate::monitor::{DedupStore, RegistryOptions, WatcherRegistry};
use crate::service::CommandServiceControl;
use crate::source::WatchOptions;
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::traits::Storage;
use crate::stream::StreamState;
use crate::web::{build_router, run_server, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/vigil/config.yml");
            eprintln!("  {}", crate::config::SYSTEM_CONFIG_PATH);
            eprintln!("\nUse --config <path> to specify a config file, or run 'vigil config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_agent(&config_path).await.map_err(|e| e.into())
}

async fn run_agent(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "loading configuration");
    let config = load_config(config_path)?;
    let agent = config.agent_id();
    info!(agent = %agent, "agent identity resolved");

    // Storage failures here are fatal; everything after is per-file.
    info!(path = %config.storage.path.display(), "initializing storage");
    let storage = DuckDbStorage::new(&config.storage.path)?;
    storage.init_schema().await?;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let dedup = Arc::new(DedupStore::load(storage.clone()).await?);
    let paths = Arc::new(PathStore::new(config.log_paths_file(), config.webapps_file()));

    let registry = WatcherRegistry::new(dedup, RegistryOptions::from(&config.monitor));
    let reconciler = registry.spawn_reconciler(
        paths.clone(),
        agent.clone(),
        config.monitor.reconcile_interval,
    );

    let cancel = CancellationToken::new();
    let health = Arc::new(HealthMonitor::new(paths.clone(), &config.health)?);
    let health_handle = health.clone().spawn(cancel.clone());

    let app = router(&config, agent, storage, registry.clone(), paths, health);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listen = config.web.listen.clone();
    let mut web_handle = tokio::spawn(async move { run_server(app, &listen, shutdown_rx).await });

    info!("agent started, press Ctrl+C to shut down");

    let web_result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            None
        }
        result = &mut web_handle => Some(result),
    };

    let _ = shutdown_tx.send(true);
    cancel.cancel();
    registry.shutdown();

    if let Err(e) = reconciler.await {
        if !e.is_cancelled() {
            error!(error = %e, "reconciler task failed");
        }
    }
    if let Err(e) = health_handle.await {
        error!(error = %e, "health monitor task failed");
    }

    let web_result = match web_result {
        Some(result) => result,
        None => web_handle.await,
    };
    web_result??;

    info!("agent shutdown complete");
    Ok(())
}

fn router(
    config: &Config,
    agent: String,
    storage: Arc<dyn Storage>,
    registry: WatcherRegistry,
    paths: Arc<PathStore>,
    health: Arc<HealthMonitor>,
) -> axum::Router {
    let stream_state = Arc::new(StreamState {
        paths: paths.clone(),
        agent: agent.clone(),
        config: config.stream.clone(),
        watch: WatchOptions::from(&config.monitor),
    });
    let state = Arc::new(AppState {
        agent,
        storage,
        registry,
        paths,
        health,
        services: Arc::new(CommandServiceControl::new(config.services.clone())),
        service_filter: config.services.list_filter.clone(),
    });
    build_router(state, stream_state, Arc::from(config.agent.api_key.as_str()))
}
