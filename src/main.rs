use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blob_pipeline::{
    api,
    blob_store::{self as store, BlobStore},
    config::{Config, StorageBackend},
    service::StorageService,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "blob-pipeline starting");

    // Load configuration
    let config = Config::load()?;
    info!(
        middlewares = ?config.middleware_order,
        thumbnail_async = config.thumbnails.async_enabled,
        "Loaded configuration"
    );

    // Initialize blob store backend
    let mut local_store = None;
    let blob_store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => {
            let path = &config.storage.local_storage_path;
            let store = match config.storage.local_signing_key.as_deref() {
                Some(secret) => store::LocalStore::with_signing(
                    path,
                    &config.storage.local_public_url,
                    secret.as_bytes(),
                )?,
                None => {
                    warn!("LOCAL_SIGNING_KEY not set, presigned links will not survive a restart");
                    store::LocalStore::with_random_key(path, &config.storage.local_public_url)?
                }
            };
            info!("Using local storage backend at: {}", path);
            let store = Arc::new(store);
            local_store = Some(Arc::clone(&store));
            store
        }
        StorageBackend::Gcs => {
            let store =
                store::GcsStore::new(config.storage.gcs_credentials_file.as_deref()).await?;
            info!("Using GCS storage backend");
            Arc::new(store)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage backend");
            Arc::new(store::MemoryStore::new())
        }
    };

    // Build the pipeline and start its workers
    let service = StorageService::start(&config, blob_store)?;

    let state = Arc::new(AppState {
        config: config.clone(),
        service,
        local_store,
    });

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on: {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: stop the sweeper and drain thumbnail workers
    info!("Shutting down background tasks");
    state.service.shutdown().await;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, draining connections");
}
