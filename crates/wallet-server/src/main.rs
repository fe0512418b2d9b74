//! HTTP API server for a syncing shielded wallet.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use shielded_wallet::{FeedAdapter, FileKv, KeyViewer, Syncer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod handlers;
mod routes;

use config::ServerConfig;

pub type WalletSyncer = Syncer<FileKv, KeyViewer, FeedAdapter>;

/// Application state shared across handlers
pub struct AppState {
    pub syncer: Arc<WalletSyncer>,
    pub viewer: KeyViewer,
    pub feed: FeedAdapter,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    info!(path = %config.data_path.display(), "opening wallet store");

    let kv = Arc::new(FileKv::open(&config.data_path).await?);
    let viewer = KeyViewer::new(config.viewing_key);
    let feed = FeedAdapter::new();
    let syncer = Arc::new(
        Syncer::open(
            kv,
            Arc::new(viewer.clone()),
            Arc::new(feed.clone()),
            config.wallet.clone(),
        )
        .await?,
    );

    let sync_loop =
        Arc::clone(&syncer).spawn_loop(Duration::from_millis(config.sync_interval_ms));
    let state = Arc::new(AppState {
        syncer,
        viewer,
        feed,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining sync loop");
    sync_loop.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
