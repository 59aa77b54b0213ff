mod cameras;
mod config;
mod errors;
mod layout;
mod playback;
mod routes;
mod state;
mod viewer;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::cameras::frigate::FrigateSource;
use crate::cameras::selection::{MemorySelectionStore, RedisSelectionStore, SelectionStore};
use crate::config::Config;
use crate::layout::AspectModel;
use crate::playback::{PlaybackSupervisor, RelayHub};
use crate::routes::build_router;
use crate::state::AppState;
use crate::viewer::Viewer;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tilewall v{}", env!("CARGO_PKG_VERSION"));

    // Camera source
    let source = FrigateSource::new(config.frigate_url.clone(), config.source_timeout)
        .context("Failed to build Frigate HTTP client")?;
    info!("Frigate source: {}", config.frigate_url);

    // Selection store (Redis when configured, in-memory otherwise)
    let store: Arc<dyn SelectionStore> = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            info!("Redis selection store initialized");
            Arc::new(RedisSelectionStore::new(client))
        }
        None => {
            info!("REDIS_URL not set; selection is kept in memory");
            Arc::new(MemorySelectionStore::new())
        }
    };

    // Playback: relay sessions driven by the rendering host
    let relay = RelayHub::new();
    let aspects = AspectModel::new();
    let supervisor = Arc::new(PlaybackSupervisor::new(
        config.supervisor(),
        aspects.clone(),
        Arc::new(relay.clone()),
    ));
    info!(
        "Watchdog: timeout {:?}, poll {:?}",
        config.watchdog_timeout, config.watchdog_poll
    );

    let viewer = Arc::new(Viewer::new(Arc::new(source), store, aspects, supervisor));

    // The NVR may still be booting; the host can retry via /api/v1/cameras/refresh
    if let Err(e) = viewer.refresh().await {
        warn!("Initial camera fetch failed: {e}");
    }

    // Measured aspects re-apply the last layout's target aspects
    tokio::spawn(viewer.clone().follow_aspects());

    // Build app state
    let state = AppState {
        config: config.clone(),
        viewer,
        relay,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the kiosk host is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
