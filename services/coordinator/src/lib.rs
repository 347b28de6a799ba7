//! Training coordinator: round-robin dataset dispense and model artifact collection.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use trainhub_core::{clear_ready, init_tracing, mark_ready, start_health_server};

pub mod catalog;
pub mod dispenser;
pub mod error;
pub mod metrics;
pub mod service;
pub mod settings;
pub mod store;

pub use catalog::{DirCatalog, ShardCatalog};
pub use dispenser::RoundRobinDispenser;
pub use error::{CoordinatorError, CoordinatorResult};
pub use metrics::CoordinatorMetrics;
pub use service::{create_router, AppState, ModelsResponse, UploadResponse, MODEL_FIELD};
pub use settings::CoordinatorConfig;
pub use store::{ArtifactStore, PendingArtifact, StoredArtifact};

/// Builds state from `cfg`, creating the artifact directory if needed.
pub async fn build_state(cfg: &CoordinatorConfig, metrics: CoordinatorMetrics) -> Result<AppState> {
    let store = ArtifactStore::new(&cfg.models_dir);
    store
        .ensure_dir()
        .await
        .with_context(|| format!("creating models dir {}", cfg.models_dir.display()))?;
    Ok(AppState::new(DirCatalog::new(&cfg.datasets_dir), store, metrics))
}

/// Loads configuration and serves until Ctrl+C or SIGTERM.
pub async fn run() -> Result<()> {
    let cfg = CoordinatorConfig::load()?;
    init_tracing(&cfg.service_name, &cfg.log_level)?;
    info!(?cfg, "config loaded");

    if cfg.health_port != 0 {
        start_health_server(cfg.health_port).await?;
    }
    let metrics = CoordinatorMetrics::register(prometheus::default_registry())?;
    let state = build_state(&cfg, metrics).await?;
    let app = create_router(state, &cfg.public_dir, cfg.max_upload_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, datasets = %cfg.datasets_dir.display(), models = %cfg.models_dir.display(), "coordinator listening");
    mark_ready();

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    clear_ready();
    info!("coordinator shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received terminate signal"),
    }
}
