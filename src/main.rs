use fup::blob::{BlobStore, FsBlobStore};
use fup::constants::FUP_BANNER;
use fup::{AppState, Config};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fup=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    // Prepare storage root. The index does not survive restarts, so anything
    // left on disk from a previous run is unaccounted for.
    let blobs = FsBlobStore::new(&config.storage_root);
    blobs.init().await?;
    if config.purge_on_start {
        let removed = blobs.purge_all().await?;
        if removed > 0 {
            tracing::warn!(removed, "Purged leftover objects from a previous run");
        }
    }

    let port = config.port;
    tracing::info!(
        storage_root = %config.storage_root.display(),
        max_object_size = config.max_object_size,
        max_storage = config.max_storage,
        ttl_secs = config.ttl.as_secs(),
        clean_interval_secs = config.clean_interval.as_secs(),
        captcha = config.captcha_enabled,
        "Configuration loaded"
    );

    let state = AppState::new(config, Arc::new(blobs));

    // Start background sweeper
    let sweeper = state.sweeper().spawn(state.config.clean_interval);

    // SECURITY: Rate limiting per client IP
    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(2) // 2 requests per second
        .burst_size(10) // Allow burst of 10
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Failed to build rate limit config"))?;

    let rate_limit_layer = GovernorLayer {
        config: Arc::new(rate_limit_config),
    };

    let app = fup::router(state).layer(rate_limit_layer);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("{} listening on {}", FUP_BANNER, addr);
    tracing::info!("📖 API docs available at http://{}/docs", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
