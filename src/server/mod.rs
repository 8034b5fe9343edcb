use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub mod events;
pub mod handlers;
pub mod state;

pub use self::state::AppState;
use handlers::{
    annotation_action, authorization_changed, get_annotations, get_settings, get_viewport,
    index_html, location_update, map_events_stream, region_will_change, spawn_sighting,
    update_settings, view_appeared,
};

// Create the main application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_html))
        .route("/api/events", get(map_events_stream))
        .route("/api/viewport", get(get_viewport))
        .route("/api/annotations", get(get_annotations))
        .route("/api/annotations/:index/action", post(annotation_action))
        .route("/api/appear", post(view_appeared))
        .route("/api/authorization", post(authorization_changed))
        .route("/api/location", post(location_update))
        .route("/api/region", post(region_will_change))
        .route("/api/spawn", post(spawn_sighting))
        .route("/api/settings", get(get_settings).post(update_settings))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(CompressionLayer::new()),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16, open_browser: bool) -> Result<()> {
    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;

    let url = format!("http://{addr}");
    info!("map server listening on {url}");
    if open_browser {
        if let Err(e) = crate::utils::open_browser(&url) {
            warn!("could not open browser: {e}");
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
