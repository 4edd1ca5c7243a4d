//! Amber Cache - content-addressed blob caching proxy

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use amber_api::{AppState, create_router};
use amber_core::BlobService;
use amber_proxy::{AuthorIndex, FetchClient, FetchConfig, HttpAuthorIndex, ServerResolver};
use amber_store::BlobStore;
use config::Config;

/// Amber Cache - content-addressed blob caching proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Listen port (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Cache directory (overrides CACHE_DIR)
    #[arg(long)]
    cache_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }

    info!("Starting Amber Cache v{}", env!("CARGO_PKG_VERSION"));

    let store = BlobStore::open(&config.cache_dir, config.max_cache_size).await?;

    let fetcher = FetchClient::new(FetchConfig {
        request_timeout: config.request_timeout,
        max_redirects: config.max_redirects,
    })?;

    let author_index: Option<Arc<dyn AuthorIndex>> = if config.lookup_relays.is_empty() {
        None
    } else {
        info!(
            "author lookups enabled via {} relays",
            config.lookup_relays.len()
        );
        Some(Arc::new(HttpAuthorIndex::new(config.lookup_relays.clone())?))
    };
    let resolver = ServerResolver::new(
        author_index,
        config.author_lookup_timeout,
        config.fallback_servers.clone(),
    );

    let service = BlobService::new(store.clone(), fetcher, resolver);
    let state = AppState::new(store, service, config.allowed_upload_nets.clone());

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {addr}");
    info!("Cache directory: {:?}", config.cache_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Initialize logging
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
