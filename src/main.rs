use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod constants;
mod controller;
mod creature;
mod error;
mod geo;
mod geo_index;
mod html_template;
mod permission;
mod route;
mod server;
mod settings;
mod utils;
mod viewport;

use geo_index::MemoryGeoIndex;
use server::{start_server, AppState};
use settings::Settings;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pokefinder=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("PokeFinder v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load().context("Failed to load settings")?;
    info!(
        port = settings.port,
        query_radius_km = settings.query_radius_km,
        "settings loaded from {}",
        Settings::config_path().display()
    );

    let index = if settings.snapshot_enabled {
        MemoryGeoIndex::open(utils::snapshot_path()).context("Failed to open sighting index")?
    } else {
        MemoryGeoIndex::new()
    };
    if index.is_empty() {
        info!("no sightings recorded yet");
    } else {
        info!(sightings = index.len(), "resuming with recorded sightings");
    }

    let port = settings.port;
    let open_browser = settings.auto_open_browser;
    let state = AppState::new(settings, index);

    start_server(state, port, open_browser).await
}
